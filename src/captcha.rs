//! Client for a FlareSolverr-compatible challenge solving service.
//!
//! The service loads the page in its own browser, waits out any Cloudflare
//! style interstitial and hands back the cookies that prove the challenge was
//! passed. Those cookies are then injected into our browser session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveStatus {
    /// The request never produced a usable answer (transport or decode error).
    Error,
    /// The service answered with a non-success HTTP status.
    Fail,
    /// No solver is configured.
    Skip,
    Success,
}

/// A cookie handed back by the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvedCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    /// Unix timestamp in seconds; absent or negative for session cookies.
    #[serde(default)]
    pub expires: Option<f64>,
}

impl SolveStatus {
    /// Parse a status string as reported by the solver backend.
    #[must_use]
    pub fn from_backend(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "fail" => Some(Self::Fail),
            "skip" => Some(Self::Skip),
            "success" => Some(Self::Success),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub cookies: Option<Vec<SolvedCookie>>,
}

impl SolveResult {
    fn without_cookies(status: SolveStatus) -> Self {
        Self {
            status,
            cookies: None,
        }
    }

    /// Cookies worth injecting: only on success and only when non-empty.
    #[must_use]
    pub fn usable_cookies(&self) -> Option<&[SolvedCookie]> {
        if self.status != SolveStatus::Success {
            return None;
        }
        self.cookies.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SolveRequest<'a> {
    cmd: &'static str,
    url: &'a str,
    max_timeout: u64,
}

#[derive(Debug, Deserialize)]
struct SolveResponse {
    /// Kept raw so an unexpected value is reported rather than failing decode.
    status: Option<String>,
    solution: Option<Solution>,
}

#[derive(Debug, Deserialize)]
struct Solution {
    #[serde(default)]
    cookies: Vec<SolvedCookie>,
}

#[derive(Debug, Clone)]
pub struct CaptchaSolver {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl CaptchaSolver {
    #[must_use]
    pub fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            // Solves can take the full budget; the per-request timeout is set in `solve`.
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self { client, endpoint }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Ask the solver to clear `url`. Never fails: problems map to a status.
    pub async fn solve(&self, url: &str, timeout_ms: u64) -> SolveResult {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return SolveResult::without_cookies(SolveStatus::Skip);
        };

        debug!(url = %url, endpoint = %endpoint, "Requesting captcha solve");

        let request = SolveRequest {
            cmd: "request.get",
            url,
            max_timeout: timeout_ms,
        };

        let response = match self
            .client
            .post(endpoint)
            .timeout(Duration::from_millis(timeout_ms) + Duration::from_secs(10))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Captcha solver request failed");
                return SolveResult::without_cookies(SolveStatus::Error);
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            warn!(url = %url, status = %response.status(), "Captcha solver returned an error status");
            return SolveResult::without_cookies(SolveStatus::Fail);
        }

        match response.json::<SolveResponse>().await {
            Ok(body) => {
                let status = match body.status.as_deref() {
                    Some(raw) => SolveStatus::from_backend(raw).unwrap_or_else(|| {
                        warn!(url = %url, status = %raw, "Captcha solver returned an unknown status");
                        SolveStatus::Error
                    }),
                    None => {
                        warn!(url = %url, "Captcha solver response carried no status");
                        SolveStatus::Error
                    }
                };
                let cookies = body.solution.map(|s| s.cookies);
                debug!(
                    url = %url,
                    status = ?status,
                    cookies = cookies.as_ref().map_or(0, Vec::len),
                    "Captcha solver answered"
                );
                SolveResult { status, cookies }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to decode captcha solver response");
                SolveResult::without_cookies(SolveStatus::Error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_solver_skips() {
        let solver = CaptchaSolver::new(None);
        let result = solver.solve("https://example.com", 1000).await;
        assert_eq!(result.status, SolveStatus::Skip);
        assert!(result.usable_cookies().is_none());
    }

    #[test]
    fn test_usable_cookies_requires_success_and_cookies() {
        let cookie = SolvedCookie {
            name: "cf_clearance".to_string(),
            value: "abc".to_string(),
            domain: Some(".example.com".to_string()),
            path: Some("/".to_string()),
            http_only: true,
            secure: true,
            expires: None,
        };

        let empty = SolveResult {
            status: SolveStatus::Success,
            cookies: Some(Vec::new()),
        };
        assert!(empty.usable_cookies().is_none());

        let failed = SolveResult {
            status: SolveStatus::Fail,
            cookies: Some(vec![cookie.clone()]),
        };
        assert!(failed.usable_cookies().is_none());

        let ok = SolveResult {
            status: SolveStatus::Success,
            cookies: Some(vec![cookie]),
        };
        assert_eq!(ok.usable_cookies().map(<[_]>::len), Some(1));
    }

    #[test]
    fn test_status_from_backend() {
        assert_eq!(SolveStatus::from_backend("success"), Some(SolveStatus::Success));
        assert_eq!(SolveStatus::from_backend(" Fail "), Some(SolveStatus::Fail));
        assert_eq!(SolveStatus::from_backend("ok"), None);
        assert_eq!(SolveStatus::from_backend(""), None);
    }

    #[test]
    fn test_cookie_deserializes_solver_shape() {
        let json = r#"{"name":"cf_clearance","value":"v","domain":".x.com","path":"/","httpOnly":true,"secure":true,"expires":1735689600.5,"sameSite":"None"}"#;
        let cookie: SolvedCookie = serde_json::from_str(json).unwrap();
        assert!(cookie.http_only);
        assert_eq!(cookie.expires, Some(1_735_689_600.5));
    }
}
