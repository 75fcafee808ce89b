use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SpeedtestNow,
    ReloadConfig,
    Quiesce,
    CollectDiag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Delivered,
    Done,
}

/// A server-initiated operation delivered to an agent via the `/report`
/// response and acknowledged on the agent's next report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    pub machine_id: String,
    #[serde(rename = "type")]
    pub kind: CommandType,
    #[serde(default)]
    pub args: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<CommandResult>,
    pub status: CommandStatus,
}

/// The shape an agent posts back after executing a command. `status` is
/// free text (`"ok" | "error" | "unsupported"`) rather than an enum because
/// the wire contract in §6 treats it as an opaque string the dashboard
/// renders verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: Uuid,
    pub status: String,
    #[serde(default)]
    pub output: Value,
}

/// Wire-shape the dispatching agent sees in a `/report` response — a subset
/// of `Command`'s fields, omitting server-internal bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommand {
    pub command_id: Uuid,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub args: Value,
}

impl From<&Command> for PendingCommand {
    fn from(c: &Command) -> Self {
        PendingCommand {
            command_id: c.command_id,
            kind: c.kind,
            args: c.args.clone(),
        }
    }
}
