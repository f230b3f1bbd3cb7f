//! Request/response shapes spoken by durable counters.
//!
//! A request is a path: `/increment/<windowMs>` or `/reset`. A response is a
//! status code plus a plain-text body, the decimal count for an increment or
//! `OK` for a reset.

/// Status code for a handled request.
pub const STATUS_OK: u16 = 200;
/// Status code for a malformed request.
pub const STATUS_BAD_REQUEST: u16 = 400;
/// Status code for an unknown action.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Status code for a storage failure.
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// An action addressed to a single counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRequest {
    /// Record an event and report the windowed count
    Increment { window_ms: u64 },
    /// Delete every recorded event
    Reset,
}

impl ActorRequest {
    /// Encode the request as a path.
    pub fn path(&self) -> String {
        match self {
            ActorRequest::Increment { window_ms } => format!("/increment/{}", window_ms),
            ActorRequest::Reset => "/reset".to_string(),
        }
    }

    /// Decode a request path.
    ///
    /// Unknown actions yield a `404` response and a missing or non-numeric
    /// window yields a `400`. Trailing segments after `/reset` are ignored.
    pub fn parse(path: &str) -> Result<Self, ActorResponse> {
        let mut segments = path.trim_start_matches('/').split('/');

        match segments.next() {
            Some("increment") => {
                let raw = segments.next().unwrap_or_default();
                raw.parse::<u64>()
                    .map(|window_ms| ActorRequest::Increment { window_ms })
                    .map_err(|_| {
                        ActorResponse::bad_request(format!("Invalid window: {:?}", raw))
                    })
            }
            Some("reset") => Ok(ActorRequest::Reset),
            _ => Err(ActorResponse::not_found()),
        }
    }
}

/// The reply to an [`ActorRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorResponse {
    /// HTTP-style status code
    pub status: u16,
    /// Plain-text body
    pub body: String,
}

impl ActorResponse {
    /// A `200` response carrying `body`.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK,
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: STATUS_NOT_FOUND,
            body: "Not found".to_string(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            body: reason.into(),
        }
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self {
            status: STATUS_INTERNAL_ERROR,
            body: reason.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
