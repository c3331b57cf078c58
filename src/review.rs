//! Monitoring-review gate
//!
//! Merges of monitoring-sensitive changes are held until the platform
//! monitoring boards have been reviewed today and carry no release blocker.
//! The endpoint serves one JSON document per board.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Review status of a single monitoring board
#[derive(Debug, Clone, Deserialize)]
pub struct BoardReview {
    /// ISO timestamp of the most recent review
    pub last_review: String,
    /// A reviewer flagged an issue that must block the next release
    pub has_platform_release_blocker: bool,
}

impl BoardReview {
    /// Calendar date of the last review, if the timestamp parses
    pub fn last_review_date(&self) -> Option<NaiveDate> {
        self.last_review
            .get(..10)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    }
}

/// Why a board is holding merges back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewHold {
    /// The board has not been reviewed today
    Stale {
        board: String,
        last_review: Option<NaiveDate>,
    },
    /// The board carries a release blocker
    Blocked { board: String },
}

impl std::fmt::Display for ReviewHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale { board, last_review } => match last_review {
                Some(date) => write!(
                    f,
                    "monitoring board '{board}' not reviewed today (last review {date})"
                ),
                None => write!(
                    f,
                    "monitoring board '{board}' has no parseable review timestamp"
                ),
            },
            Self::Blocked { board } => {
                write!(f, "monitoring board '{board}' has a release blocker")
            }
        }
    }
}

/// Hold verdict for one board, relative to `today`. Clear means reviewed
/// today and blocker-free; an unparseable timestamp counts as stale.
pub fn board_hold(board: &str, review: &BoardReview, today: NaiveDate) -> Option<ReviewHold> {
    match review.last_review_date() {
        Some(date) if date >= today => {}
        last_review => {
            return Some(ReviewHold::Stale {
                board: board.to_string(),
                last_review,
            });
        }
    }
    if review.has_platform_release_blocker {
        return Some(ReviewHold::Blocked {
            board: board.to_string(),
        });
    }
    None
}

/// Access to the monitoring-review service
#[async_trait]
pub trait MonitoringGate: Send + Sync {
    /// Current review status of `board`
    async fn board_review(&self, board: &str) -> Result<BoardReview>;
}

/// First hold across `boards`, or `None` when all are clear
pub async fn first_hold(
    gate: &dyn MonitoringGate,
    boards: &[String],
    today: NaiveDate,
) -> Result<Option<ReviewHold>> {
    for board in boards {
        let review = gate.board_review(board).await?;
        if let Some(hold) = board_hold(board, &review, today) {
            debug!(board, %hold, "monitoring board holds merges");
            return Ok(Some(hold));
        }
    }
    Ok(None)
}

/// HTTP client for the monitoring-review endpoint
pub struct MonitoringReviewClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl MonitoringReviewClient {
    /// Client for the review service at `endpoint`
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fc-release-tools")
            .build()
            .map_err(|e| Error::Forge(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl MonitoringGate for MonitoringReviewClient {
    async fn board_review(&self, board: &str) -> Result<BoardReview> {
        let url = format!("{}/{board}", self.endpoint.as_str().trim_end_matches('/'));
        debug!(url, "fetching monitoring review status");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::GatewayUnavailable(format!(
                "monitoring review endpoint returned {} for board '{board}'",
                response.status()
            )));
        }
        Ok(response.json::<BoardReview>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 23).unwrap()
    }

    fn review(last_review: &str, blocker: bool) -> BoardReview {
        BoardReview {
            last_review: last_review.to_string(),
            has_platform_release_blocker: blocker,
        }
    }

    #[test]
    fn reviewed_today_without_blocker_is_clear() {
        let r = review("2026-08-23T09:15:00+02:00", false);
        assert_eq!(board_hold("platform", &r, today()), None);
    }

    #[test]
    fn stale_review_holds() {
        let r = review("2026-08-22T17:00:00+02:00", false);
        match board_hold("platform", &r, today()) {
            Some(ReviewHold::Stale { board, last_review }) => {
                assert_eq!(board, "platform");
                assert_eq!(last_review, NaiveDate::from_ymd_opt(2026, 8, 22));
            }
            other => panic!("expected stale hold, got {other:?}"),
        }
    }

    #[test]
    fn blocker_holds_even_when_current() {
        let r = review("2026-08-23T09:15:00+02:00", true);
        assert_eq!(
            board_hold("platform", &r, today()),
            Some(ReviewHold::Blocked {
                board: "platform".to_string()
            })
        );
    }

    #[test]
    fn unparseable_timestamp_counts_as_stale() {
        let r = review("soon", false);
        assert!(matches!(
            board_hold("platform", &r, today()),
            Some(ReviewHold::Stale {
                last_review: None,
                ..
            })
        ));
    }
}
