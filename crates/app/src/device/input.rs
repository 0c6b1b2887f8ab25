//! `din` / `switch`: debounced digital input.
//!
//! A new level replaces the current one only after holding for the debounce
//! window. A switch also accepts `set` / `toggle`, which override the logical
//! value (and drive the pin when it is declared `dout`).

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::Instant;

use shardhub_domain::entry::{Cache, PinDirection};
use shardhub_domain::error::HubError;

use super::behavior::{BehaviorContext, wait_until};
use super::bus::PinBus;
use super::command::{bool_arg, unknown};
use crate::shard::CommandRequest;

pub(crate) struct Input {
    bus: PinBus,
    pin: u8,
    debounce: Duration,
    /// Set for switches: the direction of their pin.
    switch: Option<PinDirection>,
    value: Option<bool>,
    pending: Option<(bool, Instant)>,
}

impl Input {
    pub(crate) fn new(
        bus: PinBus,
        pin: u8,
        debounce_ms: u64,
        switch: Option<PinDirection>,
    ) -> Self {
        Self {
            bus,
            pin,
            debounce: Duration::from_millis(debounce_ms),
            switch,
            value: None,
            pending: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        ctx: BehaviorContext,
        mut mailbox: mpsc::Receiver<CommandRequest>,
    ) {
        let mut pins = self.bus.subscribe();
        match self.bus.read(self.pin) {
            Ok(level) => self.accept(&ctx, level),
            Err(err) => {
                ctx.fail(err);
                return;
            }
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
                event = pins.recv() => match event {
                    Ok(event) if event.index == self.pin => self.observe(&ctx, event.level),
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => match self.bus.read(self.pin) {
                        Ok(level) => self.observe(&ctx, level),
                        Err(err) => {
                            ctx.fail(err);
                            break;
                        }
                    },
                    Err(RecvError::Closed) => break,
                },
                () = wait_until(self.pending.map(|(_, deadline)| deadline)) => {
                    if let Some((level, _)) = self.pending.take() {
                        self.accept(&ctx, level);
                    }
                }
            }
        }
    }

    /// Feed a raw level through the debounce filter.
    fn observe(&mut self, ctx: &BehaviorContext, level: bool) {
        if self.value == Some(level) {
            self.pending = None;
            return;
        }
        if self.debounce.is_zero() {
            self.accept(ctx, level);
            return;
        }
        match self.pending {
            Some((pending, _)) if pending == level => {}
            _ => self.pending = Some((level, Instant::now() + self.debounce)),
        }
    }

    fn accept(&mut self, ctx: &BehaviorContext, level: bool) {
        self.pending = None;
        self.value = Some(level);
        tracing::debug!(entry = %ctx.id, level, "input level accepted");
        ctx.publish(Cache::Input { value: self.value });
    }

    fn handle(
        &mut self,
        ctx: &BehaviorContext,
        command: &str,
        args: &Value,
    ) -> Result<Value, HubError> {
        match (command, self.switch) {
            ("get", _) => Ok(json!({"value": self.value})),
            ("set", Some(direction)) => {
                let value = bool_arg(command, args)?;
                self.force(ctx, direction, value)
            }
            ("toggle", Some(direction)) => {
                let value = !self.value.unwrap_or(false);
                self.force(ctx, direction, value)
            }
            (other, _) => Err(unknown(ctx.kind, other)),
        }
    }

    fn force(
        &mut self,
        ctx: &BehaviorContext,
        direction: PinDirection,
        value: bool,
    ) -> Result<Value, HubError> {
        if direction == PinDirection::Dout {
            self.bus
                .write(self.pin, value)
                .map_err(|err| ctx.fail(err))?;
        }
        self.accept(ctx, value);
        Ok(json!({"value": value}))
    }
}
