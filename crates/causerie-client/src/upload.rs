//! Outgoing file transfers.
//!
//! A send progresses through Uploading, Caching and the final message
//! send, with a transient [`Upload`] record in the models tracking
//! progress. Service failures do not raise: the record flips to Error
//! and the task parks until the user cancels it, which is the one exit
//! from that state. Thumbnail problems only ever degrade the message,
//! never abort it.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use causerie_media::{generate_thumbnail, image_dimensions, ThumbnailError};
use causerie_model::{TransferError, Upload, UploadStatus};
use causerie_shared::constants::TRANSACTION_ID_KEY;
use causerie_shared::error::Result;
use causerie_shared::{CauserieError, RoomId, TxnId};

use crate::echo::{register_local_echo, EchoMedia};
use crate::monitor::transfer_monitor;
use crate::service::{UploadResponse, UploadSource};
use crate::session::Session;

impl Session {
    /// Upload `path` and send it as a message in `room_id`.
    ///
    /// Cancellation (before, during or after a failed transfer) is not
    /// an error from the caller's point of view: the record disappears
    /// and the call returns cleanly without sending anything.
    pub async fn send_file(&self, room_id: &RoomId, path: PathBuf) -> Result<()> {
        let item_id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.upload_cancels
            .lock()
            .expect("upload cancels poisoned")
            .insert(item_id, cancel_tx);

        let result = self.drive_upload(item_id, room_id, &path, cancel_rx).await;

        self.upload_cancels
            .lock()
            .expect("upload cancels poisoned")
            .remove(&item_id);

        match result {
            Err(CauserieError::Cancelled) => {
                info!(room = %room_id, file = %path.display(), "File send cancelled");
                self.backend.models().with_uploads(room_id, |uploads| {
                    uploads.remove(&item_id.to_string());
                });
                Ok(())
            }
            other => other,
        }
    }

    /// Request cancellation of an in-flight (or parked) file send.
    pub fn cancel_upload(&self, upload_id: Uuid) {
        if let Some(cancel) = self
            .upload_cancels
            .lock()
            .expect("upload cancels poisoned")
            .get(&upload_id)
        {
            let _ = cancel.send(true);
        }
    }

    async fn drive_upload(
        &self,
        item_id: Uuid,
        room_id: &RoomId,
        path: &Path,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let models = self.backend.models();
        let txn = TxnId::new();
        let item_key = item_id.to_string();

        let encrypt = models
            .with_rooms(&self.user_id, |rooms| {
                rooms.get(&room_id.0).map(|room| room.encrypted)
            })
            .unwrap_or(false);

        let total_size = tokio::fs::metadata(path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);

        models.with_uploads(room_id, |uploads| {
            uploads.insert(
                item_key.clone(),
                Upload::new(item_id, path.to_owned(), total_size),
            );
        });

        let (progress, mut progress_rx) = transfer_monitor(total_size);
        let consumer_backend = self.backend.clone();
        let consumer_room = room_id.clone();
        let consumer_key = item_key.clone();
        tokio::spawn(async move {
            // Ends when the progress sender is dropped.
            while let Some(sample) = progress_rx.recv().await {
                consumer_backend
                    .models()
                    .with_uploads(&consumer_room, |uploads| {
                        uploads.update(&consumer_key, |item| {
                            item.uploaded = sample.transferred;
                            item.speed = sample.speed;
                            item.time_left = sample.time_left;
                        });
                    });
            }
        });

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let upload = self.service.upload(
            UploadSource::Path(path.to_owned()),
            &filename,
            encrypt,
            Some(progress),
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                return Err(CauserieError::Cancelled);
            }
            outcome = upload => outcome,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    room = %room_id,
                    file = %path.display(),
                    error = %err,
                    "File upload failed, waiting for cancellation"
                );
                models.with_uploads(room_id, |uploads| {
                    uploads.update(&item_key, |item| {
                        item.status = UploadStatus::Error;
                        item.error = Some(TransferError::Service {
                            kind: format!("{:?}", err.kind),
                            message: err.message.clone(),
                        });
                    });
                });
                // Park until the user acknowledges by cancelling.
                let _ = cancel_rx.wait_for(|cancelled| *cancelled).await;
                return Err(CauserieError::Cancelled);
            }
        };

        models.with_uploads(room_id, |uploads| {
            uploads.update(&item_key, |item| item.status = UploadStatus::Caching);
        });
        if let Err(err) = self.backend.media().put_file(&response.reference, path).await {
            warn!(file = %path.display(), error = %err, "Caching sent file failed");
        }

        if *cancel_rx.borrow() {
            return Err(CauserieError::Cancelled);
        }

        let kind = response.mime.split('/').next().unwrap_or("").to_owned();
        let mut info = json!({
            "mimetype": response.mime,
            "size": total_size,
        });
        let mut content = json!({
            "body": filename,
            TRANSACTION_ID_KEY: txn.to_string(),
        });
        if encrypt {
            let mut file = json!({ "url": response.reference });
            if let Some(Value::Object(descriptor)) = &response.decryption {
                for (key, value) in descriptor {
                    file[key.as_str()] = value.clone();
                }
            }
            content["file"] = file;
        } else {
            content["url"] = json!(response.reference);
        }

        let mut media = EchoMedia {
            url: response.reference.clone(),
            title: filename.clone(),
            mime: response.mime.clone(),
            size: total_size,
            ..EchoMedia::default()
        };

        match kind.as_str() {
            "image" => {
                content["msgtype"] = json!("m.image");

                let bytes = match tokio::fs::read(path).await {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "Reading image back failed");
                        None
                    }
                };

                if let Some(bytes) = &bytes {
                    match image_dimensions(bytes) {
                        Ok((w, h)) => {
                            info["w"] = json!(w);
                            info["h"] = json!(h);
                            media.width = w;
                            media.height = h;
                        }
                        Err(err) => {
                            warn!(file = %path.display(), error = %err, "Image probe failed");
                        }
                    }
                }

                if let Some(bytes) = bytes {
                    self.attach_thumbnail(
                        room_id,
                        &item_key,
                        path,
                        bytes,
                        encrypt,
                        &mut info,
                        &mut media,
                        &mut cancel_rx,
                    )
                    .await?;
                }
            }
            "audio" => {
                content["msgtype"] = json!("m.audio");
                let meta = self.backend.av_probe().probe(path);
                info["duration"] = json!(meta.duration_ms);
                media.duration_ms = meta.duration_ms;
            }
            "video" => {
                content["msgtype"] = json!("m.video");
                let meta = self.backend.av_probe().probe(path);
                info["duration"] = json!(meta.duration_ms);
                info["w"] = json!(meta.width);
                info["h"] = json!(meta.height);
                media.duration_ms = meta.duration_ms;
                media.width = meta.width;
                media.height = meta.height;
            }
            _ => {
                content["msgtype"] = json!("m.file");
                content["filename"] = json!(filename);
            }
        }

        content["info"] = info;

        if *cancel_rx.borrow() {
            return Err(CauserieError::Cancelled);
        }

        models.with_uploads(room_id, |uploads| {
            uploads.remove(&item_key);
        });

        register_local_echo(
            &self.backend,
            &self.user_id,
            room_id,
            txn,
            filename,
            Some(media),
        );

        self.send_message_content(room_id, content).await?;
        Ok(())
    }

    /// Derive, upload and cache a thumbnail, filling `info` and
    /// `media`. Every failure short of cancellation is logged and the
    /// message goes out without a thumbnail.
    #[allow(clippy::too_many_arguments)]
    async fn attach_thumbnail(
        &self,
        room_id: &RoomId,
        item_key: &str,
        path: &Path,
        bytes: Vec<u8>,
        encrypt: bool,
        info: &mut Value,
        media: &mut EchoMedia,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let derived = tokio::task::spawn_blocking(move || generate_thumbnail(&bytes)).await;
        let (thumb_data, thumb_info) = match derived {
            Ok(Ok(result)) => result,
            Ok(Err(ThumbnailError::NotNeeded)) => {
                debug!(file = %path.display(), "Full image small enough, no thumbnail");
                return Ok(());
            }
            Ok(Err(err)) => {
                warn!(file = %path.display(), error = %err, "Thumbnail derivation failed");
                return Ok(());
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "Thumbnail task failed");
                return Ok(());
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let thumb_name = format!("{stem}_thumbnail{ext}");

        self.backend.models().with_uploads(room_id, |uploads| {
            uploads.update(item_key, |item| {
                item.status = UploadStatus::Uploading;
                item.filepath = PathBuf::from(&thumb_name);
                item.total_size = thumb_info.size;
                item.uploaded = 0;
            });
        });

        let upload = self.service.upload(
            UploadSource::Bytes(thumb_data.clone()),
            &thumb_name,
            encrypt,
            None,
        );
        let outcome: std::result::Result<UploadResponse, _> = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                return Err(CauserieError::Cancelled);
            }
            outcome = upload => outcome,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                // Unlike the main transfer, this one is optional.
                warn!(file = %path.display(), error = %err, "Thumbnail upload failed, skipping");
                return Ok(());
            }
        };

        self.backend.models().with_uploads(room_id, |uploads| {
            uploads.update(item_key, |item| item.status = UploadStatus::Caching);
        });
        if let Err(err) = self
            .backend
            .media()
            .put_bytes(&response.reference, &thumb_data)
            .await
        {
            warn!(error = %err, "Caching thumbnail failed");
        }

        if encrypt {
            let mut file = json!({ "url": response.reference });
            if let Some(Value::Object(descriptor)) = &response.decryption {
                for (key, value) in descriptor {
                    file[key.as_str()] = value.clone();
                }
            }
            info["thumbnail_file"] = file;
        } else {
            info["thumbnail_url"] = json!(response.reference);
        }
        info["thumbnail_info"] = json!({
            "w": thumb_info.width,
            "h": thumb_info.height,
            "mimetype": thumb_info.mime,
            "size": thumb_info.size,
        });

        media.thumbnail_url = response.reference;
        media.thumbnail_width = thumb_info.width;
        media.thumbnail_height = thumb_info.height;

        Ok(())
    }
}
