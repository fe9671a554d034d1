//! Event lifecycle state machine.
//!
//! `emerging --[unique_source_count >= N]--> confirmed --[quiet 48h]-->
//! fading --[quiet 7d]--> archived`; a new mention revives any stage
//! except `archived` back to `confirmed`. Suppressed events skip all
//! transitions (enforced by the callers, which never evaluate them).

use chrono::{DateTime, Duration, Utc};

use crate::models::LifecycleStatus;

/// Transition on a new mention. `emerging` promotes only once the unique
/// source threshold is met; `archived` is terminal.
pub fn on_new_mention(
    current: LifecycleStatus,
    unique_source_count: i32,
    confirm_threshold: i32,
) -> LifecycleStatus {
    match current {
        LifecycleStatus::Archived => LifecycleStatus::Archived,
        LifecycleStatus::Emerging => {
            if unique_source_count >= confirm_threshold {
                LifecycleStatus::Confirmed
            } else {
                LifecycleStatus::Emerging
            }
        }
        LifecycleStatus::Confirmed | LifecycleStatus::Fading => LifecycleStatus::Confirmed,
    }
}

/// Transition on the periodic quiet check. Returns `None` when nothing
/// changes.
pub fn on_quiet_check(
    current: LifecycleStatus,
    last_mention_at: DateTime<Utc>,
    now: DateTime<Utc>,
    fading_after: Duration,
    archive_after: Duration,
) -> Option<LifecycleStatus> {
    let quiet = now - last_mention_at;
    match current {
        LifecycleStatus::Confirmed if quiet >= fading_after => Some(LifecycleStatus::Fading),
        LifecycleStatus::Fading | LifecycleStatus::Emerging if quiet >= archive_after => {
            Some(LifecycleStatus::Archived)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emerging_confirms_at_threshold() {
        assert_eq!(
            on_new_mention(LifecycleStatus::Emerging, 2, 3),
            LifecycleStatus::Emerging
        );
        assert_eq!(
            on_new_mention(LifecycleStatus::Emerging, 3, 3),
            LifecycleStatus::Confirmed
        );
    }

    #[test]
    fn fading_revives_to_confirmed() {
        assert_eq!(
            on_new_mention(LifecycleStatus::Fading, 1, 3),
            LifecycleStatus::Confirmed
        );
    }

    #[test]
    fn archived_is_terminal() {
        assert_eq!(
            on_new_mention(LifecycleStatus::Archived, 10, 3),
            LifecycleStatus::Archived
        );
    }

    #[test]
    fn quiet_confirmed_fades_then_archives() {
        let now = Utc::now();
        let fading_after = Duration::hours(48);
        let archive_after = Duration::days(7);

        assert_eq!(
            on_quiet_check(
                LifecycleStatus::Confirmed,
                now - Duration::hours(49),
                now,
                fading_after,
                archive_after
            ),
            Some(LifecycleStatus::Fading)
        );
        assert_eq!(
            on_quiet_check(
                LifecycleStatus::Confirmed,
                now - Duration::hours(47),
                now,
                fading_after,
                archive_after
            ),
            None
        );
        assert_eq!(
            on_quiet_check(
                LifecycleStatus::Fading,
                now - Duration::days(8),
                now,
                fading_after,
                archive_after
            ),
            Some(LifecycleStatus::Archived)
        );
    }

    #[test]
    fn stale_emerging_archives() {
        let now = Utc::now();
        assert_eq!(
            on_quiet_check(
                LifecycleStatus::Emerging,
                now - Duration::days(8),
                now,
                Duration::hours(48),
                Duration::days(7)
            ),
            Some(LifecycleStatus::Archived)
        );
    }
}
