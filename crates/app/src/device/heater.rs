//! `heater`: power output gated by a tariff input.

use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use shardhub_domain::entry::{Cache, HeaterSpec};
use shardhub_domain::error::{HubError, ValidationError};
use shardhub_domain::id::EntryId;

use super::behavior::BehaviorContext;
use super::bus::PinBus;
use super::command::{fraction_arg, unknown};
use super::output::touches;
use crate::shard::CommandRequest;

pub(crate) struct Heater {
    bus: PinBus,
    pin: u8,
    tariff: Vec<EntryId>,
    requested: f64,
    driven: f64,
    tariff_high: bool,
}

impl Heater {
    pub(crate) fn new(bus: PinBus, spec: &HeaterSpec) -> Self {
        Self {
            bus,
            pin: spec.pin.index,
            tariff: spec.tariff.iter().cloned().collect(),
            requested: 0.0,
            driven: 0.0,
            tariff_high: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        ctx: BehaviorContext,
        mut mailbox: mpsc::Receiver<CommandRequest>,
    ) {
        let mut events = ctx.shard.subscribe();
        self.tariff_high = ctx.any_active(&self.tariff);
        if self.apply(&ctx).is_err() {
            return;
        }

        loop {
            tokio::select! {
                () = ctx.cancel.cancelled() => break,
                request = mailbox.recv() => {
                    let Some(request) = request else { break };
                    let result = self.handle(&ctx, &request.command, &request.args);
                    if BehaviorContext::reply(request, result) {
                        break;
                    }
                }
                event = events.recv(), if !self.tariff.is_empty() => {
                    let follow = match event {
                        Ok(event) => touches(&event, &self.tariff),
                        Err(RecvError::Lagged(_)) => true,
                        Err(RecvError::Closed) => break,
                    };
                    let high = ctx.any_active(&self.tariff);
                    if follow && high != self.tariff_high {
                        self.tariff_high = high;
                        tracing::info!(entry = %ctx.id, tariff_high = high, "tariff changed");
                        if self.apply(&ctx).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Drive the pin with the requested power, or nothing while the tariff is high.
    fn apply(&mut self, ctx: &BehaviorContext) -> Result<Value, HubError> {
        let driven = if self.tariff_high { 0.0 } else { self.requested };
        self.bus
            .write_duty(self.pin, driven)
            .map_err(|err| ctx.fail(err))?;
        self.driven = driven;
        ctx.publish(Cache::Heater {
            requested: self.requested,
            driven,
            tariff_high: self.tariff_high,
        });
        Ok(self.status())
    }

    fn status(&self) -> Value {
        json!({
            "requested": self.requested,
            "driven": self.driven,
            "tariffHigh": self.tariff_high,
        })
    }

    fn handle(
        &mut self,
        ctx: &BehaviorContext,
        command: &str,
        args: &Value,
    ) -> Result<Value, HubError> {
        match command {
            "power" => {
                let fraction = fraction_arg(command, args)?;
                if !(0.0..=1.0).contains(&fraction) {
                    return Err(ValidationError::PowerOutOfRange(fraction).into());
                }
                self.requested = fraction;
                self.apply(ctx)
            }
            "get" => Ok(self.status()),
            other => Err(unknown(ctx.kind, other)),
        }
    }
}
