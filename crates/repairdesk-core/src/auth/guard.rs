use super::session::Session;

/// Outcome of checking a route against the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    RedirectLogin,
    RedirectProfile,
    RedirectHome,
}

impl Access {
    pub fn is_allowed(self) -> bool {
        self == Access::Allow
    }

    /// Path to navigate to, if this is a redirect
    pub fn redirect_path(self) -> Option<&'static str> {
        match self {
            Access::Allow => None,
            Access::RedirectLogin => Some("/login"),
            Access::RedirectProfile => Some("/profile"),
            Access::RedirectHome => Some("/"),
        }
    }
}

/// Gate placed in front of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteGuard {
    /// Only for logged-out users (the login screen)
    Public,
    /// Requires a login; staff-only views also require `is_staff`
    Private { require_staff: bool },
    /// Entry point: sends users to login or to their profile
    Landing,
}

impl RouteGuard {
    pub const PRIVATE: RouteGuard = RouteGuard::Private {
        require_staff: false,
    };
    pub const STAFF: RouteGuard = RouteGuard::Private {
        require_staff: true,
    };

    pub fn check(self, session: &Session) -> Access {
        let authenticated = session.is_authenticated();
        match self {
            RouteGuard::Public if authenticated => Access::RedirectHome,
            RouteGuard::Public => Access::Allow,
            RouteGuard::Private { .. } if !authenticated => Access::RedirectLogin,
            RouteGuard::Private {
                require_staff: true,
            } if !session.is_staff => Access::RedirectProfile,
            RouteGuard::Private { .. } => Access::Allow,
            RouteGuard::Landing if authenticated => Access::RedirectProfile,
            RouteGuard::Landing => Access::RedirectLogin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: bool, is_staff: bool) -> Session {
        Session {
            access_token: token.then(|| "A".to_string()),
            is_staff,
            ..Default::default()
        }
    }

    #[test]
    fn test_private_route() {
        assert_eq!(RouteGuard::PRIVATE.check(&session(false, false)), Access::RedirectLogin);
        assert_eq!(RouteGuard::PRIVATE.check(&session(true, false)), Access::Allow);
        assert_eq!(RouteGuard::PRIVATE.check(&session(true, true)), Access::Allow);
    }

    #[test]
    fn test_staff_route() {
        assert_eq!(RouteGuard::STAFF.check(&session(false, true)), Access::RedirectLogin);
        assert_eq!(RouteGuard::STAFF.check(&session(true, false)), Access::RedirectProfile);
        assert_eq!(RouteGuard::STAFF.check(&session(true, true)), Access::Allow);
    }

    #[test]
    fn test_public_route() {
        assert_eq!(RouteGuard::Public.check(&session(false, false)), Access::Allow);
        assert_eq!(RouteGuard::Public.check(&session(true, false)), Access::RedirectHome);
    }

    #[test]
    fn test_landing_route() {
        assert_eq!(RouteGuard::Landing.check(&session(false, false)), Access::RedirectLogin);
        assert_eq!(RouteGuard::Landing.check(&session(true, true)), Access::RedirectProfile);
    }

    #[test]
    fn test_partial_session_is_logged_out() {
        // Profile fields without a token still count as logged out
        let partial = Session {
            user_id: Some("1".to_string()),
            is_staff: true,
            ..Default::default()
        };
        assert_eq!(RouteGuard::STAFF.check(&partial), Access::RedirectLogin);
    }

    #[test]
    fn test_redirect_paths() {
        assert_eq!(Access::Allow.redirect_path(), None);
        assert_eq!(Access::RedirectLogin.redirect_path(), Some("/login"));
        assert_eq!(Access::RedirectProfile.redirect_path(), Some("/profile"));
        assert_eq!(Access::RedirectHome.redirect_path(), Some("/"));
        assert!(Access::Allow.is_allowed());
    }
}
