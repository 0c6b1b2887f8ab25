//! `rpi`: the pin controller every pin-backed entry hangs off.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use shardhub_domain::entry::{Cache, EntryKind};
use shardhub_domain::error::HubError;

use super::behavior::BehaviorContext;
use super::bus::PinBus;
use super::command::{bool_arg, index_arg, unknown};
use crate::shard::CommandRequest;

pub(crate) struct Controller {
    bus: PinBus,
    dummy: bool,
    pins: BTreeMap<u8, bool>,
}

impl Controller {
    pub(crate) fn new(bus: PinBus, dummy: bool) -> Self {
        Self {
            bus,
            dummy,
            pins: BTreeMap::new(),
        }
    }

    fn cache(&self) -> Cache {
        Cache::Controller {
            dummy: self.dummy,
            pins: self.pins.clone(),
        }
    }

    pub(crate) async fn run(
        mut self,
        ctx: BehaviorContext,
        mut mailbox: mpsc::Receiver<CommandRequest>,
    ) {
        let mut hardware = self.bus.hardware();
        let mut seen = self.bus.subscribe();
        ctx.publish(self.cache());

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
                Ok(event) = hardware.recv(), if !self.dummy => self.bus.publish(event),
                event = seen.recv() => match event {
                    Ok(event) => {
                        if self.pins.insert(event.index, event.level) != Some(event.level) {
                            ctx.publish(self.cache());
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(entry = %ctx.id, skipped, "pin events lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    fn handle(
        &mut self,
        ctx: &BehaviorContext,
        command: &str,
        args: &Value,
    ) -> Result<Value, HubError> {
        match command {
            "emulatePin" => {
                let index = index_arg(command, args)?;
                let value = bool_arg(command, args)?;
                tracing::info!(entry = %ctx.id, index, value, "emulating pin");
                self.bus.emulate(index, value);
                Ok(json!({"index": index, "value": value}))
            }
            "readPin" => {
                let index = index_arg(command, args)?;
                let value = self.bus.read(index).map_err(|err| ctx.fail(err))?;
                Ok(json!({"index": index, "value": value}))
            }
            "get" => Ok(json!({"dummy": self.dummy, "pins": self.pins})),
            other => Err(unknown(EntryKind::Rpi, other)),
        }
    }
}
