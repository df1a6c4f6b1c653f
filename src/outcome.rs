/// Result of calling an external dependency whose failure the handler can absorb.
///
/// `Unavailable` means the dependency could not answer (store down, empty
/// graph result). `Error` means it answered badly. Callers pick the fallback
/// explicitly instead of catching failures after the fact.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Unavailable(String),
    Error(String),
}

impl<T> Outcome<T> {
    /// Take the value or log and fall back
    pub fn or_fallback(self, what: &str, fallback: T) -> T {
        match self {
            Outcome::Success(value) => value,
            Outcome::Unavailable(reason) => {
                tracing::warn!("{} unavailable, continuing without it: {}", what, reason);
                fallback
            }
            Outcome::Error(reason) => {
                tracing::warn!("{} failed, continuing without it: {}", what, reason);
                fallback
            }
        }
    }
}

#[cfg(test)]
impl<T> Outcome<T> {
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Default> Outcome<T> {
    pub fn or_default_logged(self, what: &str) -> T {
        self.or_fallback(what, T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_only_when_not_success() {
        assert_eq!(Outcome::Success(3).or_fallback("x", 0), 3);
        assert_eq!(Outcome::<i32>::Unavailable("down".into()).or_fallback("x", 0), 0);
        assert_eq!(Outcome::<i32>::Error("bad".into()).or_default_logged("x"), 0);
    }

    #[test]
    fn test_failure_kinds_are_distinct() {
        assert_ne!(
            Outcome::<i32>::Unavailable("down".into()),
            Outcome::<i32>::Error("down".into())
        );
    }
}
