//! Outcome of an asynchronous request as seen by a view

/// Lifecycle of one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestState<T, E> {
    #[default]
    Idle,
    Loading,
    Success(T),
    Error(E),
}

impl<T, E> RequestState<T, E> {
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Error(err),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// True once the request has succeeded or failed
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Error(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RequestState<U, E> {
        match self {
            Self::Idle => RequestState::Idle,
            Self::Loading => RequestState::Loading,
            Self::Success(value) => RequestState::Success(f(value)),
            Self::Error(err) => RequestState::Error(err),
        }
    }
}

impl<T, E> From<Result<T, E>> for RequestState<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Self::from_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let state: RequestState<u32, String> = RequestState::default();
        assert_eq!(state, RequestState::Idle);
        assert!(!state.is_settled());
    }

    #[test]
    fn results_settle_the_state() {
        let ok: RequestState<u32, String> = Ok(3).into();
        assert_eq!(ok.value(), Some(&3));
        assert!(ok.is_settled());

        let failed: RequestState<u32, String> = Err("boom".to_string()).into();
        assert_eq!(failed.error().map(String::as_str), Some("boom"));
        assert_eq!(failed.value(), None);
    }

    #[test]
    fn map_only_touches_success() {
        let loading: RequestState<u32, String> = RequestState::Loading;
        assert!(loading.map(|v| v * 2).is_loading());
        assert_eq!(
            RequestState::<u32, String>::Success(2).map(|v| v * 2),
            RequestState::Success(4)
        );
    }
}
