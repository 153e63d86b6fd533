use std::sync::RwLock;

use crate::settings::ProfileSettings;

pub const ENV_TOKEN: &str = "STUDYHALL_TOKEN";

/// Who is going online. Issued by an external identity service; this crate only
/// carries the token along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub display_name: String,
    pub token: Option<String>,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<CallerIdentity>;
}

/// Identity held for the lifetime of the process; the shell signs in and out
/// through it.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    current: RwLock<Option<CallerIdentity>>,
}

impl SessionIdentity {
    pub fn new(identity: Option<CallerIdentity>) -> Self {
        Self {
            current: RwLock::new(identity),
        }
    }

    /// Signed-in identity from the profile settings plus `STUDYHALL_TOKEN`.
    pub fn from_profile(profile: &ProfileSettings) -> Self {
        let token = std::env::var(ENV_TOKEN).ok().filter(|t| !t.trim().is_empty());
        Self::new(identity_from_profile(profile, token))
    }

    pub fn sign_in(&self, identity: CallerIdentity) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(identity);
    }

    pub fn sign_out(&self) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<CallerIdentity> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

fn identity_from_profile(profile: &ProfileSettings, token: Option<String>) -> Option<CallerIdentity> {
    let user_id = profile
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())?;
    let display_name = profile
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(user_id);

    Some(CallerIdentity {
        user_id: user_id.to_string(),
        display_name: display_name.to_string(),
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_without_user_is_signed_out() {
        assert_eq!(identity_from_profile(&ProfileSettings::default(), None), None);

        let blank = ProfileSettings {
            user_id: Some("  ".into()),
            display_name: Some("Ada".into()),
        };
        assert_eq!(identity_from_profile(&blank, None), None);
    }

    #[test]
    fn display_name_falls_back_to_user_id() {
        let profile = ProfileSettings {
            user_id: Some("u-7".into()),
            display_name: None,
        };
        let identity = identity_from_profile(&profile, Some("tok".into())).unwrap();
        assert_eq!(identity.display_name, "u-7");
        assert_eq!(identity.token.as_deref(), Some("tok"));
    }

    #[test]
    fn sign_in_and_out() {
        let identity = SessionIdentity::default();
        assert_eq!(identity.current(), None);

        identity.sign_in(CallerIdentity::new("u-1", "Ada"));
        assert_eq!(identity.current().unwrap().user_id, "u-1");

        identity.sign_out();
        assert_eq!(identity.current(), None);
    }
}
