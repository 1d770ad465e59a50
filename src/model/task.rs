use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::ids::{OwnerId, TaskId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Active,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    Once,
    Interval,
    Daily,
    Weekly,
    Monthly,
    Cron,
}

/// Schedule configuration, modelled as a tagged sum rather than a loose
/// map (§9: "treat dict-shape fallback as a deserialization detail, not a
/// runtime polymorphism feature").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleConfig {
    Once {
        run_at: DateTime<Utc>,
    },
    Interval {
        period_seconds: u64,
    },
    Daily {
        hour: u32,
        minute: u32,
        #[serde(with = "tz_serde")]
        timezone: Tz,
    },
    Weekly {
        hour: u32,
        minute: u32,
        /// 0 = Monday, per §3.2.
        weekdays: HashSet<u32>,
        #[serde(with = "tz_serde")]
        timezone: Tz,
    },
    Monthly {
        hour: u32,
        minute: u32,
        /// 1-31; clamped to the actual last day of the target month.
        days: HashSet<u32>,
        #[serde(with = "tz_serde")]
        timezone: Tz,
    },
    Cron {
        expression: String,
        #[serde(with = "tz_serde")]
        timezone: Tz,
    },
}

pub(crate) mod tz_serde {
    use chrono_tz::Tz;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(tz: &Tz, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Tz, D::Error> {
        let s = String::deserialize(d)?;
        Tz::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    Function {
        symbol: String,
        args: serde_json::Value,
    },
    Http {
        url: String,
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<serde_json::Value>,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Goal {
        goal_id: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    Notification {
        notification_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    Timeout,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub scheduled_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: ExecutionOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    pub name: String,
    pub schedule_type: ScheduleType,
    pub schedule: ScheduleConfig,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub allow_overlap: bool,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub executions: VecDeque<Execution>,
    pub tags: Vec<String>,
    pub owner_id: OwnerId,
    pub tenant_id: TenantId,
}

impl ScheduledTask {
    pub fn push_execution(&mut self, execution: Execution, max_history: usize) {
        self.executions.push_back(execution);
        while self.executions.len() > max_history {
            self.executions.pop_front();
        }
    }
}
