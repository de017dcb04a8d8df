pub mod cron_job;
pub mod token;

pub use cron_job::{CronJob, JobHandle};
pub use token::ScheduleTokenProvider;

use crate::config::Config;
use crate::error::SchedulerError;

/// Cron expression configured for `job_name`.
pub fn schedule_for<'a>(config: &'a Config, job_name: &str) -> Result<&'a str, SchedulerError> {
    config
        .jobs
        .get(job_name)
        .map(String::as_str)
        .ok_or_else(|| SchedulerError::MissingSchedule(job_name.to_string()))
}
