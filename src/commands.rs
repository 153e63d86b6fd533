//! Line-oriented front end. Each user action is one async handler over
//! `AppState` that returns a printable result or an error string.

use std::{fmt::Write as _, str::FromStr};

use crate::{
    models::{PeerRecord, Subject},
    presence::{identity::ENV_TOKEN, CallerIdentity, ConnectOutcome, IdentityProvider},
    settings::ProfileSettings,
    timer::{FocusSnapshot, TimerStatus},
    AppState,
};

pub const HELP: &str = "\
commands:
  login <user-id> [display name]   sign in
  logout                           go offline and sign out
  subject add <ID> <name>          register or rename a subject
  subjects                         list subjects and totals
  focus <ID>                       start, switch or resume a subject
  pause | resume                   pause or resume the timer
  online | offline                 join or leave the current room
  room create                      create a private room and switch to it
  room join <code>                 switch to a room (blank or GLOBAL = global)
  room leave                       back to the global room
  roster                           peers in the current room
  status                           timer and connection state
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        user_id: String,
        display_name: Option<String>,
    },
    Logout,
    AddSubject {
        id: String,
        display_name: String,
    },
    Subjects,
    Focus(String),
    Pause,
    Resume,
    Online,
    Offline,
    CreateRoom,
    JoinRoom(String),
    LeaveRoom,
    Roster,
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or_else(|| "empty command".to_string())?;
        let rest: Vec<&str> = words.collect();

        let command = match (head.to_lowercase().as_str(), rest.as_slice()) {
            ("login", [user_id, name @ ..]) => Command::Login {
                user_id: user_id.to_string(),
                display_name: (!name.is_empty()).then(|| name.join(" ")),
            },
            ("logout", []) => Command::Logout,
            ("subject", ["add", id, name @ ..]) => Command::AddSubject {
                id: id.to_uppercase(),
                display_name: if name.is_empty() {
                    id.to_string()
                } else {
                    name.join(" ")
                },
            },
            ("subjects", []) => Command::Subjects,
            ("focus", [id]) => Command::Focus(id.to_uppercase()),
            ("pause", []) => Command::Pause,
            ("resume", []) => Command::Resume,
            ("online", []) => Command::Online,
            ("offline", []) => Command::Offline,
            ("room", ["create"]) => Command::CreateRoom,
            ("room", ["join", code @ ..]) => Command::JoinRoom(code.join(" ")),
            ("room", ["leave"]) => Command::LeaveRoom,
            ("roster", []) => Command::Roster,
            ("status", []) => Command::Status,
            ("help", []) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            _ => return Err(format!("unrecognized command: {}", line.trim())),
        };
        Ok(command)
    }
}

pub async fn login(
    state: &AppState,
    user_id: String,
    display_name: Option<String>,
) -> Result<CallerIdentity, String> {
    let token = std::env::var(ENV_TOKEN)
        .ok()
        .filter(|token| !token.trim().is_empty());
    let display_name = display_name.unwrap_or_else(|| user_id.clone());

    state
        .settings
        .update_profile(ProfileSettings {
            user_id: Some(user_id.clone()),
            display_name: Some(display_name.clone()),
        })
        .map_err(|e| e.to_string())?;

    let mut identity = CallerIdentity::new(user_id, display_name);
    identity.token = token;
    state.identity.sign_in(identity.clone());
    Ok(identity)
}

pub async fn logout(state: &AppState) -> Result<(), String> {
    state.presence.disconnect().await;
    state.identity.sign_out();
    Ok(())
}

pub async fn add_subject(
    state: &AppState,
    id: &str,
    display_name: &str,
) -> Result<Subject, String> {
    state
        .timer
        .add_subject(id, display_name)
        .await
        .map_err(|e| e.to_string())
}

pub async fn focus(state: &AppState, subject_id: &str) -> Result<FocusSnapshot, String> {
    state
        .timer
        .select_subject(subject_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn go_online(state: &AppState) -> Result<ConnectOutcome, String> {
    state.presence.connect().await.map_err(|e| e.to_string())
}

pub async fn execute(state: &AppState, command: Command) -> Result<String, String> {
    match command {
        Command::Login {
            user_id,
            display_name,
        } => {
            let identity = login(state, user_id, display_name).await?;
            Ok(format!(
                "signed in as {} ({})",
                identity.display_name, identity.user_id
            ))
        }
        Command::Logout => {
            logout(state).await?;
            Ok("signed out".into())
        }
        Command::AddSubject { id, display_name } => {
            let subject = add_subject(state, &id, &display_name).await?;
            Ok(format!("subject {} = {}", subject.id, subject.display_name))
        }
        Command::Subjects => Ok(render_subjects(&state.timer.subjects().await)),
        Command::Focus(id) => Ok(render_snapshot(&focus(state, &id).await?)),
        Command::Pause => Ok(render_snapshot(&state.timer.pause().await)),
        Command::Resume => Ok(render_snapshot(&state.timer.resume().await)),
        Command::Online => match go_online(state).await? {
            ConnectOutcome::Connected { peer_id } => Ok(format!("online as {peer_id}")),
            ConnectOutcome::AlreadyConnecting => Ok("already connecting".into()),
            ConnectOutcome::AlreadyConnected => Ok("already online".into()),
            ConnectOutcome::Superseded => Ok("connection attempt was cancelled".into()),
        },
        Command::Offline => {
            state.presence.disconnect().await;
            Ok("offline".into())
        }
        Command::CreateRoom => {
            let room = state
                .presence
                .create_room()
                .await
                .map_err(|e| e.to_string())?;
            Ok(format!("created room {room}; share this code"))
        }
        Command::JoinRoom(code) => {
            let room = state
                .presence
                .join_room(&code)
                .await
                .map_err(|e| e.to_string())?;
            Ok(format!("room {room}"))
        }
        Command::LeaveRoom => {
            let room = state
                .presence
                .leave_room()
                .await
                .map_err(|e| e.to_string())?;
            Ok(format!("room {room}"))
        }
        Command::Roster => Ok(render_roster(&state.presence.roster())),
        Command::Status => {
            let timer = state.timer.snapshot().await;
            let presence = state.presence.status().await;
            let who = state
                .identity
                .current()
                .map(|identity| identity.display_name)
                .unwrap_or_else(|| "signed out".into());
            Ok(format!(
                "{}\n{:?} in {} as {} (peer {})",
                render_snapshot(&timer),
                presence.phase,
                presence.room,
                who,
                presence.peer_id.as_deref().unwrap_or("-")
            ))
        }
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
    }
}

fn render_snapshot(snapshot: &FocusSnapshot) -> String {
    let state = match snapshot.status {
        TimerStatus::Running => "focusing",
        TimerStatus::Idle if snapshot.active_subject_id.is_some() => "paused",
        TimerStatus::Idle => "idle",
    };
    match &snapshot.subject_label {
        Some(label) => format!(
            "{state}: {label} {} (total {})",
            clock(snapshot.elapsed_seconds),
            clock(snapshot.subject_total_seconds)
        ),
        None => state.to_string(),
    }
}

fn render_subjects(subjects: &[Subject]) -> String {
    if subjects.is_empty() {
        return "no subjects yet".into();
    }
    let mut out = String::new();
    for subject in subjects {
        let _ = writeln!(
            out,
            "{:<10} {:<20} {}",
            subject.id,
            subject.display_name,
            clock(subject.total_accumulated_seconds)
        );
    }
    out.trim_end().to_string()
}

fn render_roster(roster: &[PeerRecord]) -> String {
    if roster.is_empty() {
        return "nobody else here".into();
    }
    let mut out = String::new();
    for peer in roster {
        let _ = writeln!(
            out,
            "{:<16} {:<9} {:<16} {}",
            peer.display_name,
            peer.status.as_str(),
            peer.subject_label,
            clock(peer.elapsed_seconds)
        );
    }
    out.trim_end().to_string()
}

fn clock(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
