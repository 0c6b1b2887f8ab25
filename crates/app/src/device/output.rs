//! `dout`: digital output, optionally following the OR of its switches.

use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use shardhub_domain::entry::Cache;
use shardhub_domain::error::HubError;
use shardhub_domain::id::EntryId;

use super::behavior::BehaviorContext;
use super::bus::PinBus;
use super::command::{bool_arg, unknown};
use crate::shard::{CommandRequest, ShardEvent};

pub(crate) struct Output {
    bus: PinBus,
    pin: u8,
    switches: Vec<EntryId>,
    value: bool,
}

/// Whether `event` may change the reading of any of `ids`.
pub(crate) fn touches(event: &ShardEvent, ids: &[EntryId]) -> bool {
    match event {
        ShardEvent::EntryChanged { id, .. } => ids.contains(id),
        ShardEvent::Committed(changes) => changes
            .iter()
            .any(|change| ids.contains(change.op.entry_id())),
        ShardEvent::EntryStateChanged { .. } => false,
    }
}

impl Output {
    pub(crate) fn new(bus: PinBus, pin: u8, switches: Vec<EntryId>) -> Self {
        Self {
            bus,
            pin,
            switches,
            value: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        ctx: BehaviorContext,
        mut mailbox: mpsc::Receiver<CommandRequest>,
    ) {
        let mut events = ctx.shard.subscribe();
        let initial = ctx.any_active(&self.switches);
        if self.drive(&ctx, initial).is_err() {
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
                event = events.recv(), if !self.switches.is_empty() => {
                    let follow = match event {
                        Ok(event) => touches(&event, &self.switches),
                        Err(RecvError::Lagged(_)) => true,
                        Err(RecvError::Closed) => break,
                    };
                    if follow {
                        let level = ctx.any_active(&self.switches);
                        if level != self.value && self.drive(&ctx, level).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    fn drive(&mut self, ctx: &BehaviorContext, level: bool) -> Result<Value, HubError> {
        self.bus
            .write(self.pin, level)
            .map_err(|err| ctx.fail(err))?;
        self.value = level;
        ctx.publish(Cache::Output { value: level });
        Ok(json!({"value": level}))
    }

    fn handle(
        &mut self,
        ctx: &BehaviorContext,
        command: &str,
        args: &Value,
    ) -> Result<Value, HubError> {
        match command {
            "set" => {
                let level = bool_arg(command, args)?;
                self.drive(ctx, level)
            }
            "toggle" => {
                let level = !self.value;
                self.drive(ctx, level)
            }
            "get" => Ok(json!({"value": self.value})),
            other => Err(unknown(ctx.kind, other)),
        }
    }
}
