// Command model: what a transport handler submits for execution and what
// it gets back.

pub mod orchestrator;

use std::time::Duration;

use crate::{
  clock::CancelToken,
  radio::{ChannelIndex, Frequency, PowerDbm, RadioId},
  telemetry::event::CorrelationId,
};

/// The mutating operations a command can request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandOp {
  SetPower(PowerDbm),
  SetFrequency(Frequency),
  SetChannel(ChannelIndex),
}

impl CommandOp {
  pub fn name(&self) -> &'static str {
    match self {
      CommandOp::SetPower(_) => "setPower",
      CommandOp::SetFrequency(_) => "setFrequency",
      CommandOp::SetChannel(_) => "setChannel",
    }
  }
}

impl std::fmt::Display for CommandOp {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CommandOp::SetPower(p) => write!(f, "setPower({p})"),
      CommandOp::SetFrequency(freq) => write!(f, "setFrequency({freq})"),
      CommandOp::SetChannel(idx) => write!(f, "setChannel({idx})"),
    }
  }
}

/// One mutating request. Ephemeral: lives only for the duration of its
/// orchestration.
#[derive(Debug, Clone)]
pub struct CommandRequest {
  pub correlation_id: CorrelationId,
  pub radio_id: RadioId,
  pub op: CommandOp,
  /// Optional caller deadline; the effective deadline is the tighter of
  /// this and the profile's command deadline.
  pub deadline: Option<Duration>,
  /// Cancelling this token aborts retry sleeps and propagates into the
  /// adapter call.
  pub cancel: CancelToken,
}

impl CommandRequest {
  pub fn new(
    correlation_id: CorrelationId,
    radio_id: impl Into<RadioId>,
    op: CommandOp,
  ) -> Self {
    Self {
      correlation_id,
      radio_id: radio_id.into(),
      op,
      deadline: None,
      cancel: CancelToken::new(),
    }
  }

  pub fn with_deadline(mut self, deadline: Duration) -> Self {
    self.deadline = Some(deadline);
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }
}

/// Result of a successful command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
  pub radio_id: RadioId,
  pub correlation_id: CorrelationId,
  /// Attempts the orchestrator needed, including the successful one.
  pub attempts: u32,
  pub power_dbm: Option<PowerDbm>,
  pub channel_index: Option<ChannelIndex>,
  pub frequency_mhz: Option<Frequency>,
  /// True when the post-mutation read-back failed and the reported values
  /// are the requested ones rather than confirmed ones.
  pub unverified: bool,
}
