//! `raspicam`: takes stills and hands them to the blob store.

use serde_json::{Value, json};
use tokio::sync::mpsc;

use shardhub_domain::entry::{Cache, CameraSpec};
use shardhub_domain::error::HubError;
use shardhub_domain::time::{Timestamp, now};

use super::behavior::BehaviorContext;
use super::command::{invalid, unknown};
use crate::shard::CommandRequest;

pub(crate) struct Camera {
    spec: CameraSpec,
    last_image: Option<String>,
    taken_at: Option<Timestamp>,
}

impl Camera {
    pub(crate) fn new(spec: CameraSpec) -> Self {
        Self {
            spec,
            last_image: None,
            taken_at: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        ctx: BehaviorContext,
        mut mailbox: mpsc::Receiver<CommandRequest>,
    ) {
        loop {
            tokio::select! {
                () = ctx.cancel.cancelled() => break,
                request = mailbox.recv() => {
                    let Some(request) = request else { break };
                    let result = self.handle(&ctx, &request.command).await;
                    if BehaviorContext::reply(request, result) {
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&mut self, ctx: &BehaviorContext, command: &str) -> Result<Value, HubError> {
        match command {
            "still" => self.still(ctx).await,
            "get" => Ok(json!({"lastImage": self.last_image, "takenAt": self.taken_at})),
            other => Err(unknown(ctx.kind, other)),
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(entry = %ctx.id, camera = self.spec.camera))]
    async fn still(&mut self, ctx: &BehaviorContext) -> Result<Value, HubError> {
        let Some(alias) = self.spec.save.as_ref().map(|save| save.shard.alias.clone()) else {
            return Err(invalid("still", "camera has no `save` target"));
        };
        let image = ctx
            .caps
            .capture
            .still(self.spec.camera)
            .await
            .map_err(|err| ctx.fail(err))?;
        let id = ctx
            .caps
            .blobs
            .save(&alias, image)
            .await
            .map_err(|err| ctx.fail(err))?;

        let taken_at = now();
        tracing::info!(image = %id, "still saved");
        self.last_image = Some(id.clone());
        self.taken_at = Some(taken_at);
        ctx.publish(Cache::Camera {
            last_image: self.last_image.clone(),
            taken_at: self.taken_at,
        });
        Ok(json!({"image": id, "takenAt": taken_at}))
    }
}
