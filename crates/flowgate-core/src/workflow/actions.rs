//! Built-in action behaviors: transform, notify, relocate, delete, delay.
//!
//! Dispatch is an exhaustive match over the fixed capability set; the
//! executor only reaches here when the registry has no override for a
//! built-in kind. `ActionKind::Custom` never reaches these contracts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flowgate_types::workflow::{ActionKind, ActionParams};

use super::notifier::{Attachment, Notification, Notifier};
use super::registry::{ActionError, ActionRegistry};

/// Token replaced by the current resource's file name in notify messages.
pub const FILENAME_TOKEN: &str = "{filename}";

/// Default pause for `delay` when no `ms` parameter is given.
pub const DEFAULT_DELAY_MS: u64 = 2_000;

/// Engine-provided behavior for the five built-in action kinds.
pub struct BuiltinActions {
    registry: Arc<ActionRegistry>,
    notifier: Arc<dyn Notifier>,
    output_dir: PathBuf,
    default_delay: Duration,
}

impl BuiltinActions {
    pub fn new(
        registry: Arc<ActionRegistry>,
        notifier: Arc<dyn Notifier>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            notifier,
            output_dir: output_dir.into(),
            default_delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }

    /// Override the pause used by `delay` actions without an `ms` parameter.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run the built-in contract for `kind`.
    pub async fn invoke(
        &self,
        kind: &ActionKind,
        resource: &Path,
        params: &ActionParams,
    ) -> Result<Option<PathBuf>, ActionError> {
        match kind {
            ActionKind::Transform => self.transform(resource, params).await.map(Some),
            ActionKind::Notify => self.notify(resource, params).await.map(|()| None),
            ActionKind::Relocate => self.relocate(resource, params).await.map(Some),
            ActionKind::Delete => self.delete(resource).await.map(|()| None),
            ActionKind::Delay => self.delay(params).await.map(|()| None),
            ActionKind::Custom(name) => Err(ActionError::Failed(format!(
                "'{name}' has no built-in behavior"
            ))),
        }
    }

    /// Derive a new artifact from `resource` with the registered `tool`.
    ///
    /// The artifact path is `<output_dir>/<tool>/<file name>` and is handed
    /// to the tool as parameter `output`. The input is never modified.
    pub async fn transform(
        &self,
        resource: &Path,
        params: &ActionParams,
    ) -> Result<PathBuf, ActionError> {
        let tool = params.get_str("tool").ok_or(ActionError::MissingParameter {
            action: "transform",
            param: "tool",
        })?;

        tokio::fs::metadata(resource)
            .await
            .map_err(|e| ActionError::io(resource, e))?;

        let implementation = self
            .registry
            .lookup(tool)
            .ok_or_else(|| ActionError::UnknownTool(tool.to_string()))?;

        let output_dir = params
            .get_str("output_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.output_dir.clone())
            .join(tool);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| ActionError::Io {
                path: output_dir.clone(),
                source: e,
            })?;

        let name = resource
            .file_name()
            .ok_or_else(|| ActionError::ResourceNotFound(resource.to_path_buf()))?;
        let output = output_dir.join(name);
        let tool_params = params
            .clone()
            .with("output", output.to_string_lossy().into_owned());

        tracing::debug!(
            tool,
            input = %resource.display(),
            output = %output.display(),
            "running transform tool"
        );

        let artifact = implementation
            .invoke(resource, &tool_params)
            .await?
            .unwrap_or(output);

        match tokio::fs::try_exists(&artifact).await {
            Ok(true) => Ok(artifact),
            _ => Err(ActionError::NoArtifact {
                tool: tool.to_string(),
                path: artifact,
            }),
        }
    }

    /// Send `message` to `destination`, substituting the resource's file name.
    ///
    /// Both parameters are checked before anything is sent. With `attach`
    /// set, the resource's bytes ride along if the file still exists.
    pub async fn notify(&self, resource: &Path, params: &ActionParams) -> Result<(), ActionError> {
        let destination = params.get_str("destination");
        let template = params.get_str("message");
        let (Some(destination), Some(template)) = (destination, template) else {
            return Err(ActionError::MissingParameter {
                action: "notify",
                param: if destination.is_none() {
                    "destination"
                } else {
                    "message"
                },
            });
        };

        let file_name = file_name_of(resource);
        let message = template.replace(FILENAME_TOKEN, &file_name);

        let attachment = if params.get_bool("attach").unwrap_or(false) {
            match tokio::fs::read(resource).await {
                Ok(bytes) => Some(Attachment {
                    file_name: file_name.clone(),
                    bytes,
                }),
                Err(e) => {
                    tracing::debug!(
                        resource = %resource.display(),
                        error = %e,
                        "attachment unavailable, sending without it"
                    );
                    None
                }
            }
        } else {
            None
        };

        let notification = Notification {
            destination: destination.to_string(),
            message,
            attachment,
        };
        self.notifier
            .send(&notification)
            .await
            .map_err(|e| ActionError::Notify(e.to_string()))
    }

    /// Move `resource` into the `destination` directory, creating it if needed.
    ///
    /// A relative destination is taken relative to the resource's directory.
    pub async fn relocate(
        &self,
        resource: &Path,
        params: &ActionParams,
    ) -> Result<PathBuf, ActionError> {
        let destination = params
            .get_str("destination")
            .map(PathBuf::from)
            .ok_or(ActionError::MissingParameter {
                action: "relocate",
                param: "destination",
            })?;
        let destination = match resource.parent() {
            Some(parent) if destination.is_relative() => parent.join(destination),
            _ => destination,
        };

        let name = resource
            .file_name()
            .ok_or_else(|| ActionError::ResourceNotFound(resource.to_path_buf()))?;

        tokio::fs::create_dir_all(&destination)
            .await
            .map_err(|e| ActionError::Io {
                path: destination.clone(),
                source: e,
            })?;

        let target = destination.join(name);
        if let Err(rename_err) = tokio::fs::rename(resource, &target).await {
            if rename_err.kind() == std::io::ErrorKind::NotFound {
                return Err(ActionError::ResourceNotFound(resource.to_path_buf()));
            }
            // Rename cannot cross filesystems; fall back to copy + remove.
            tracing::debug!(error = %rename_err, "rename failed, copying instead");
            tokio::fs::copy(resource, &target)
                .await
                .map_err(|e| ActionError::io(resource, e))?;
            tokio::fs::remove_file(resource)
                .await
                .map_err(|e| ActionError::io(resource, e))?;
        }

        Ok(target)
    }

    /// Remove `resource`. A missing file is an error.
    pub async fn delete(&self, resource: &Path) -> Result<(), ActionError> {
        tokio::fs::remove_file(resource)
            .await
            .map_err(|e| ActionError::io(resource, e))
    }

    /// Pause this run only.
    pub async fn delay(&self, params: &ActionParams) -> Result<(), ActionError> {
        let pause = params
            .get_u64("ms")
            .map(Duration::from_millis)
            .unwrap_or(self.default_delay);
        tokio::time::sleep(pause).await;
        Ok(())
    }
}

impl std::fmt::Debug for BuiltinActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinActions")
            .field("output_dir", &self.output_dir)
            .field("default_delay", &self.default_delay)
            .finish()
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::notifier::RecordingNotifier;
    use crate::workflow::test_support::copy_tool;
    use std::time::Instant;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        notifier: Arc<RecordingNotifier>,
        actions: BuiltinActions,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let registry = Arc::new(ActionRegistry::new());
        registry.register("watermark", copy_tool());
        let notifier = Arc::new(RecordingNotifier::new());
        let actions = BuiltinActions::new(registry, notifier.clone(), root.join("out"));
        Fixture {
            _dir: dir,
            root,
            notifier,
            actions,
        }
    }

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn transform_writes_artifact_and_keeps_input() {
        let fx = fixture();
        let input = fx.root.join("inbox/report.pdf");
        write(&input, "original");

        let artifact = fx
            .actions
            .transform(&input, &ActionParams::new().with("tool", "watermark"))
            .await
            .unwrap();

        assert_eq!(artifact, fx.root.join("out/watermark/report.pdf"));
        assert!(artifact.exists());
        assert_eq!(std::fs::read_to_string(&input).unwrap(), "original");
    }

    #[tokio::test]
    async fn transform_requires_tool() {
        let fx = fixture();
        let input = fx.root.join("inbox/report.pdf");
        write(&input, "original");

        let err = fx
            .actions
            .transform(&input, &ActionParams::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::MissingParameter { param: "tool", .. }
        ));
    }

    #[tokio::test]
    async fn transform_with_unknown_tool_fails() {
        let fx = fixture();
        let input = fx.root.join("inbox/report.pdf");
        write(&input, "original");

        let err = fx
            .actions
            .transform(&input, &ActionParams::new().with("tool", "ocr"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::UnknownTool(t) if t == "ocr"));
    }

    #[tokio::test]
    async fn transform_fails_when_tool_writes_nothing() {
        let fx = fixture();
        fx.actions
            .registry
            .register(
                "lazy",
                crate::workflow::registry::FnAction::new(|_r, _p| async {
                    Ok::<_, ActionError>(None)
                }),
            );
        let input = fx.root.join("inbox/report.pdf");
        write(&input, "original");

        let err = fx
            .actions
            .transform(&input, &ActionParams::new().with("tool", "lazy"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::NoArtifact { .. }));
    }

    #[tokio::test]
    async fn notify_substitutes_filename() {
        let fx = fixture();
        let input = fx.root.join("report.pdf");

        fx.actions
            .notify(
                &input,
                &ActionParams::new()
                    .with("destination", "X")
                    .with("message", "Processed {filename}"),
            )
            .await
            .unwrap();

        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, "X");
        assert_eq!(sent[0].message, "Processed report.pdf");
        assert!(sent[0].attachment.is_none());
    }

    #[tokio::test]
    async fn notify_without_both_params_sends_nothing() {
        let fx = fixture();
        let input = fx.root.join("report.pdf");

        let err = fx
            .actions
            .notify(&input, &ActionParams::new().with("message", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::MissingParameter { param: "destination", .. }
        ));

        let err = fx
            .actions
            .notify(&input, &ActionParams::new().with("destination", "X"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::MissingParameter { param: "message", .. }
        ));

        assert!(fx.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn notify_attaches_existing_file() {
        let fx = fixture();
        let input = fx.root.join("report.pdf");
        write(&input, "pdf-bytes");

        let params = ActionParams::new()
            .with("destination", "X")
            .with("message", "see attached")
            .with("attach", true);
        fx.actions.notify(&input, &params).await.unwrap();

        // A vanished file is sent without its attachment.
        std::fs::remove_file(&input).unwrap();
        fx.actions.notify(&input, &params).await.unwrap();

        let sent = fx.notifier.sent();
        let attachment = sent[0].attachment.as_ref().unwrap();
        assert_eq!(attachment.file_name, "report.pdf");
        assert_eq!(attachment.bytes, b"pdf-bytes");
        assert!(sent[1].attachment.is_none());
    }

    #[tokio::test]
    async fn relocate_creates_missing_destination() {
        let fx = fixture();
        let input = fx.root.join("inbox/report.pdf");
        write(&input, "data");
        let destination = fx.root.join("archive/2026/invoices");

        let moved = fx
            .actions
            .relocate(
                &input,
                &ActionParams::new().with("destination", destination.to_string_lossy().into_owned()),
            )
            .await
            .unwrap();

        assert_eq!(moved, destination.join("report.pdf"));
        assert!(moved.exists());
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn relocate_relative_destination_is_beside_the_resource() {
        let fx = fixture();
        let input = fx.root.join("inbox/report.pdf");
        write(&input, "data");

        let moved = fx
            .actions
            .relocate(&input, &ActionParams::new().with("destination", "archive"))
            .await
            .unwrap();

        assert_eq!(moved, fx.root.join("inbox/archive/report.pdf"));
        assert!(moved.exists());
    }

    #[tokio::test]
    async fn relocate_without_destination_fails() {
        let fx = fixture();
        let input = fx.root.join("inbox/report.pdf");
        write(&input, "data");

        let err = fx
            .actions
            .relocate(&input, &ActionParams::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::MissingParameter { param: "destination", .. }
        ));
        assert!(input.exists());
    }

    #[tokio::test]
    async fn delete_missing_file_is_an_error() {
        let fx = fixture();
        let input = fx.root.join("inbox/report.pdf");
        write(&input, "data");

        fx.actions.delete(&input).await.unwrap();
        assert!(!input.exists());

        let err = fx.actions.delete(&input).await.unwrap_err();
        assert!(matches!(err, ActionError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn delay_uses_param_or_default() {
        let fx = fixture();
        let actions = fx.actions.with_default_delay(Duration::from_millis(30));

        let start = Instant::now();
        actions.delay(&ActionParams::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));

        let start = Instant::now();
        actions
            .delay(&ActionParams::new().with("ms", 5))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn custom_kind_has_no_builtin() {
        let fx = fixture();
        let err = fx
            .actions
            .invoke(
                &ActionKind::Custom("pdf-merge".into()),
                Path::new("x"),
                &ActionParams::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Failed(_)));
    }
}
