use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use fleet_config::JobDefinition;
use fleet_domain::{FireEvent, JobMetadata, Priority};
use fleet_guard::ExecutionGuard;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 一个按cron表达式触发的任务
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub job: JobMetadata,
    pub schedule: Schedule,
    pub requires_master: bool,
}

impl ScheduledJob {
    pub fn from_definition(definition: &JobDefinition) -> Result<Self> {
        let schedule = Schedule::from_str(&definition.cron)
            .with_context(|| format!("任务 {} 的cron表达式无效: {}", definition.name, definition.cron))?;
        let priority = Priority::from_str(&definition.priority).map_err(|e| anyhow!(e))?;

        let mut job = JobMetadata::new(definition.id, &definition.name, &definition.invoke_target);
        job.job_group = definition.group.clone();
        job.priority = priority;
        job.max_retries = definition.max_retries;
        job.timeout_seconds = definition.timeout_seconds;

        Ok(Self {
            job,
            schedule,
            requires_master: definition.requires_master,
        })
    }

    /// 严格晚于 `after` 的下一次触发时间
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// cron触发源：到点后把触发交给执行守卫
pub struct CronTrigger {
    guard: Arc<ExecutionGuard>,
    jobs: Vec<ScheduledJob>,
}

impl CronTrigger {
    pub fn new(guard: Arc<ExecutionGuard>, jobs: Vec<ScheduledJob>) -> Self {
        Self { guard, jobs }
    }

    pub fn from_definitions(guard: Arc<ExecutionGuard>, definitions: &[JobDefinition]) -> Result<Self> {
        let jobs = definitions
            .iter()
            .map(ScheduledJob::from_definition)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(guard, jobs))
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// 每个任务一个循环；单次触发在独立任务中执行，慢任务不会推迟下一次计算
    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        self.jobs
            .iter()
            .cloned()
            .map(|scheduled| {
                let guard = Arc::clone(&self.guard);
                let mut shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    let job_key = scheduled.job.job_key();
                    info!("[CRON_START] job_key={} cron={}", job_key, scheduled.schedule);
                    let mut last_fire: Option<DateTime<Utc>> = None;
                    loop {
                        let now = Utc::now();
                        let from = last_fire.map_or(now, |last| last.max(now));
                        let Some(next) = scheduled.next_fire_after(from) else {
                            warn!("job_key={} 没有后续触发时间，停止调度", job_key);
                            break;
                        };
                        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        debug!("job_key={} 下次触发 {}", job_key, next);

                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {
                                last_fire = Some(next);
                                let event = FireEvent::new(scheduled.job.clone())
                                    .with_fire_time(next.timestamp_millis());
                                let guard = Arc::clone(&guard);
                                tokio::spawn(async move {
                                    guard.fire(event).await;
                                });
                            }
                            _ = shutdown_rx.recv() => {
                                info!("job_key={} 触发循环退出", job_key);
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
