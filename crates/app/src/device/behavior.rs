//! Behavior dispatch and the context every behavior task runs with.

use std::fmt::Display;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use shardhub_domain::entry::{Cache, Entry, EntryKind, KindSpec, PinDirection};
use shardhub_domain::error::{FatalError, HubError};
use shardhub_domain::id::EntryId;
use shardhub_domain::state::SubjectState;

use super::Capabilities;
use super::bus::PinBus;
use super::camera::Camera;
use super::controller::Controller;
use super::heater::Heater;
use super::input::Input;
use super::light::Light;
use super::output::Output;
use crate::shard::{CommandRequest, Shard};

/// What a behavior task needs from its surroundings.
pub(crate) struct BehaviorContext {
    pub shard: Shard,
    pub id: EntryId,
    pub kind: EntryKind,
    pub caps: Capabilities,
    pub cancel: CancellationToken,
}

impl BehaviorContext {
    /// Publish a new cache value for the entry.
    pub(crate) fn publish(&self, cache: Cache) {
        if let Err(err) = self.shard.update_cache(&self.id, cache) {
            tracing::debug!(entry = %self.id, error = %err, "entry gone, cache dropped");
        }
    }

    /// Move the entry to ERROR after a capability failure.
    pub(crate) fn fail(&self, reason: impl Display) -> HubError {
        let reason = reason.to_string();
        tracing::error!(entry = %self.id, kind = %self.kind, %reason, "capability failure");
        self.shard.set_entry_state(&self.id, SubjectState::Error);
        FatalError::Capability {
            entry: self.id.clone(),
            reason,
        }
        .into()
    }

    /// Reply to `request`, returning whether the behavior must stop.
    pub(crate) fn reply(request: CommandRequest, result: Result<Value, HubError>) -> bool {
        let fatal = matches!(result, Err(HubError::Fatal(_)));
        let _ = request.reply.send(result);
        fatal
    }

    /// Logical OR of the `active` reading of `ids`, missing entries counting as off.
    pub(crate) fn any_active(&self, ids: &[EntryId]) -> bool {
        ids.iter().any(|id| {
            self.shard
                .get(id.as_str())
                .is_some_and(|entry| entry.is_active())
        })
    }
}

/// Sleep until `deadline`, or forever without one.
pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Per-kind device logic.
pub(crate) enum Behavior {
    Controller(Controller),
    Input(Input),
    Output(Output),
    Light(Light),
    Heater(Heater),
    Camera(Camera),
}

impl Behavior {
    /// Build the behavior for `entry`; `bus` yields the pin bus of a controller.
    pub(crate) fn for_entry(entry: &Entry, bus: impl Fn(&EntryId) -> PinBus) -> Self {
        match &entry.dval.spec {
            KindSpec::Rpi(spec) => Self::Controller(Controller::new(bus(&entry.id), spec.dummy)),
            KindSpec::Raspicam(spec) => Self::Camera(Camera::new(spec.clone())),
            KindSpec::Switch(spec) => Self::Input(Input::new(
                bus(&spec.master),
                spec.pin.index,
                spec.debounce,
                Some(spec.pin.direction_or(PinDirection::Din)),
            )),
            KindSpec::Din(spec) => Self::Input(Input::new(
                bus(&spec.master),
                spec.pin.index,
                spec.debounce,
                None,
            )),
            KindSpec::Dout(spec) => Self::Output(Output::new(
                bus(&spec.master),
                spec.pin.index,
                spec.switches.clone(),
            )),
            KindSpec::Light(spec) => Self::Light(Light::new(bus(&spec.master), spec)),
            KindSpec::Heater(spec) => Self::Heater(Heater::new(bus(&spec.master), spec)),
            KindSpec::Pin(spec) => match spec.pin.direction_or(PinDirection::Din) {
                PinDirection::Din => Self::Input(Input::new(
                    bus(&spec.master),
                    spec.pin.index,
                    0,
                    None,
                )),
                PinDirection::Dout => {
                    Self::Output(Output::new(bus(&spec.master), spec.pin.index, Vec::new()))
                }
            },
        }
    }

    pub(crate) async fn run(self, ctx: BehaviorContext, mailbox: mpsc::Receiver<CommandRequest>) {
        match self {
            Self::Controller(behavior) => behavior.run(ctx, mailbox).await,
            Self::Input(behavior) => behavior.run(ctx, mailbox).await,
            Self::Output(behavior) => behavior.run(ctx, mailbox).await,
            Self::Light(behavior) => behavior.run(ctx, mailbox).await,
            Self::Heater(behavior) => behavior.run(ctx, mailbox).await,
            Self::Camera(behavior) => behavior.run(ctx, mailbox).await,
        }
    }
}
