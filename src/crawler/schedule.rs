//! Daily crawl schedule

use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::future::Future;

/// Next UTC instant at wall-clock `at` strictly after `now`
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Runs `job` every day at `at` (UTC), forever
pub async fn run_daily<F, Fut>(at: NaiveTime, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = Utc::now();
        let next = next_run_after(now, at);
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::info!("Next crawl scheduled for {}", next.to_rfc3339());

        tokio::time::sleep(wait).await;
        job().await;
    }
}
