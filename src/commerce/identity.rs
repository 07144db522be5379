/// key: commerce-identity -> audit actor resolution
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, supplied: Option<&str>) -> String;
}

/// Uses the supplied actor when present, otherwise a configured system identity.
#[derive(Clone, Debug)]
pub struct SystemIdentity {
    fallback: String,
}

impl SystemIdentity {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
        }
    }
}

impl IdentityResolver for SystemIdentity {
    fn resolve(&self, supplied: Option<&str>) -> String {
        supplied
            .map(str::trim)
            .filter(|actor| !actor.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.fallback.clone())
    }
}
