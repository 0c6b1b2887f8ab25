//! `light`: output with an optional auto-off timer.
//!
//! The timer runs from the most recent `on`; a rising edge of the OR of the
//! light's switches counts as `on`. A falling edge turns the light off only
//! when no timer is configured.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::Instant;

use shardhub_domain::entry::{Cache, LightSpec};
use shardhub_domain::error::HubError;
use shardhub_domain::id::EntryId;

use super::behavior::{BehaviorContext, wait_until};
use super::bus::PinBus;
use super::command::{bool_arg, unknown};
use super::output::touches;
use crate::shard::CommandRequest;

pub(crate) struct Light {
    bus: PinBus,
    pin: u8,
    switches: Vec<EntryId>,
    auto_off: Option<Duration>,
    on: bool,
    switch_level: bool,
    off_at: Option<Instant>,
}

impl Light {
    pub(crate) fn new(bus: PinBus, spec: &LightSpec) -> Self {
        Self {
            bus,
            pin: spec.pin.index,
            switches: spec.switches.clone(),
            auto_off: spec.auto_off.map(Duration::from_secs),
            on: false,
            switch_level: false,
            off_at: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        ctx: BehaviorContext,
        mut mailbox: mpsc::Receiver<CommandRequest>,
    ) {
        let mut events = ctx.shard.subscribe();
        self.switch_level = ctx.any_active(&self.switches);
        if self.set(&ctx, self.switch_level).is_err() {
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
                    if follow && self.follow_switches(&ctx).is_err() {
                        break;
                    }
                }
                () = wait_until(self.off_at) => {
                    tracing::info!(entry = %ctx.id, "auto off");
                    if self.set(&ctx, false).is_err() {
                        break;
                    }
                }
            }
        }
    }

    fn follow_switches(&mut self, ctx: &BehaviorContext) -> Result<(), HubError> {
        let level = ctx.any_active(&self.switches);
        if level == self.switch_level {
            return Ok(());
        }
        self.switch_level = level;
        if level {
            self.set(ctx, true)?;
        } else if self.auto_off.is_none() {
            self.set(ctx, false)?;
        }
        Ok(())
    }

    /// Drive the light; every `on` re-arms the auto-off timer.
    fn set(&mut self, ctx: &BehaviorContext, on: bool) -> Result<Value, HubError> {
        self.bus.write(self.pin, on).map_err(|err| ctx.fail(err))?;
        self.on = on;
        self.off_at = if on {
            self.auto_off.map(|delay| Instant::now() + delay)
        } else {
            None
        };
        ctx.publish(Cache::Light { on });
        Ok(json!({"on": on}))
    }

    fn handle(
        &mut self,
        ctx: &BehaviorContext,
        command: &str,
        args: &Value,
    ) -> Result<Value, HubError> {
        match command {
            "on" => self.set(ctx, true),
            "off" => self.set(ctx, false),
            "toggle" => {
                let on = !self.on;
                self.set(ctx, on)
            }
            "set" => {
                let on = bool_arg(command, args)?;
                self.set(ctx, on)
            }
            "get" => Ok(json!({"on": self.on})),
            other => Err(unknown(ctx.kind, other)),
        }
    }
}
