use tracing::instrument;

use crate::config::SyncSettings;
use crate::cycle;
use crate::summary::Summary;

/// Time to wait after a cycle that took `elapsed` so the next one starts on a period boundary.
///
/// Cycle starts stay aligned to multiples of `period` measured from the first cycle start; a
/// cycle overrunning its period is followed by the remainder up to the next boundary.
#[must_use]
pub fn next_wait(elapsed: std::time::Duration, period: std::time::Duration) -> std::time::Duration {
    let period_nanos = period.as_nanos();
    if period_nanos == 0 {
        return std::time::Duration::ZERO;
    }
    let remainder = elapsed.as_nanos() % period_nanos;
    period.saturating_sub(std::time::Duration::from_nanos(
        u64::try_from(remainder).unwrap_or(u64::MAX),
    ))
}

/// Runs sync cycles every `settings.period` until `max_cycles` cycles ran (forever if `None`).
///
/// A cycle that cannot complete is logged and the schedule continues. Returns the summary of all
/// cycles combined.
#[instrument(skip(settings))]
pub async fn run_scheduler(
    settings: &SyncSettings,
    max_cycles: Option<u64>,
    print_summary: bool,
) -> Summary {
    let mut total = Summary::default();
    let mut cycle_number = 0u64;
    loop {
        cycle_number += 1;
        let cycle_start = tokio::time::Instant::now();
        tracing::info!("sync cycle {} started", cycle_number);
        match cycle::sync_cycle(settings).await {
            Ok(summary) => {
                tracing::info!("sync cycle {} finished", cycle_number);
                if print_summary {
                    tracing::info!("sync cycle {} summary:\n{}", cycle_number, &summary);
                }
                total += summary;
            }
            Err(error) => {
                tracing::error!("sync cycle {} could not complete: {}", cycle_number, &error);
                total += error.summary;
            }
        }
        if max_cycles.is_some_and(|max| cycle_number >= max) {
            tracing::info!("finished after {} sync cycles", cycle_number);
            return total;
        }
        let wait = next_wait(cycle_start.elapsed(), settings.period);
        tracing::info!(
            "next sync cycle starts in {}",
            humantime::format_duration(wait)
        );
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use crate::testutils;
    use tracing_test::traced_test;

    use super::*;

    fn secs(secs: f64) -> std::time::Duration {
        std::time::Duration::from_secs_f64(secs)
    }

    #[test]
    fn wait_lands_on_next_period_boundary() {
        let period = secs(10.0);
        assert_eq!(next_wait(secs(0.0), period), period);
        assert_eq!(next_wait(secs(3.0), period), secs(7.0));
        assert_eq!(next_wait(secs(9.5), period), secs(0.5));
        // overrun: wait only for the remainder up to the following boundary
        assert_eq!(next_wait(secs(13.0), period), secs(7.0));
        assert_eq!(next_wait(secs(25.0), period), secs(5.0));
        assert_eq!(next_wait(secs(3.0), std::time::Duration::ZERO), secs(0.0));
    }

    #[tokio::test]
    #[traced_test]
    async fn bounded_run_sums_cycles() -> anyhow::Result<()> {
        let (src, dst) = testutils::setup_test_dirs().await?;
        let mut settings = testutils::settings(&src, &dst);
        settings.period = std::time::Duration::from_millis(50);
        let total = run_scheduler(&settings, Some(2), true).await;
        assert_eq!(total.files_copied, 5);
        assert_eq!(total.files_unchanged, 5);
        assert!(logs_contain("next sync cycle starts in"));
        assert!(logs_contain("sync cycle 2 finished"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_cycle_does_not_stop_the_schedule() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let mut settings = testutils::settings(&tmp_dir.join("missing"), &tmp_dir);
        settings.period = std::time::Duration::from_millis(10);
        let total = run_scheduler(&settings, Some(3), false).await;
        assert_eq!(total, Summary::default());
        assert!(logs_contain("sync cycle 3 could not complete"));
        Ok(())
    }
}
