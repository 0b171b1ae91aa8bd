use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::HandlerError;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// A callable service implementation.
pub trait ServiceHandler: Send + Sync {
    fn call(&self, args: Vec<Value>) -> HandlerFuture;
}

struct FnHandler<F>(F);

impl<F, Fut> ServiceHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> HandlerFuture {
        Box::pin((self.0)(args))
    }
}

/// Wrap an async closure as a [`ServiceHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ServiceHandler>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Finds the handler a service's source file exports.
///
/// The orchestrator has already checked that the source file exists at
/// `source` (the code directory joined with `filepath`); the resolver only
/// maps `(application, filepath, export)` to a callable.
pub trait HandlerResolver: Send + Sync {
    fn resolve(
        &self,
        application: &str,
        filepath: &str,
        export: &str,
        source: &Path,
    ) -> Option<Arc<dyn ServiceHandler>>;
}

/// Handlers registered up front, keyed by application, file and export name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String, String), Arc<dyn ServiceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(
        mut self,
        application: impl Into<String>,
        filepath: impl Into<String>,
        export: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Self {
        self.insert(application, filepath, export, handler);
        self
    }

    pub fn insert(
        &mut self,
        application: impl Into<String>,
        filepath: impl Into<String>,
        export: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
    ) {
        self.handlers
            .insert((application.into(), filepath.into(), export.into()), handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(
        &self,
        application: &str,
        filepath: &str,
        export: &str,
        _source: &Path,
    ) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers
            .get(&(application.to_string(), filepath.to_string(), export.to_string()))
            .cloned()
    }
}

/// Runs a service's source file as a child process, once per call.
///
/// The process receives the export name as its last argument and the JSON
/// argument list on stdin, and runs in the source file's directory. Its
/// stdout is the JSON result; empty output is `null`.
#[derive(Debug, Clone, Default)]
pub struct CommandHandlerResolver {
    interpreter: Option<String>,
}

impl CommandHandlerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run sources through `program` (`node`, `sh`, ...) instead of
    /// executing them directly.
    pub fn with_interpreter(mut self, program: impl Into<String>) -> Self {
        self.interpreter = Some(program.into());
        self
    }
}

impl HandlerResolver for CommandHandlerResolver {
    fn resolve(
        &self,
        _application: &str,
        _filepath: &str,
        export: &str,
        source: &Path,
    ) -> Option<Arc<dyn ServiceHandler>> {
        let source = std::path::absolute(source).unwrap_or_else(|_| source.to_path_buf());
        Some(Arc::new(CommandHandler {
            interpreter: self.interpreter.clone(),
            source,
            export: export.to_string(),
        }))
    }
}

struct CommandHandler {
    interpreter: Option<String>,
    source: PathBuf,
    export: String,
}

impl CommandHandler {
    fn command(&self) -> Command {
        let mut command = match &self.interpreter {
            Some(program) => {
                let mut command = Command::new(program);
                command.arg(&self.source);
                command
            }
            None => Command::new(&self.source),
        };
        command.arg(&self.export);
        if let Some(dir) = self.source.parent() {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl ServiceHandler for CommandHandler {
    fn call(&self, args: Vec<Value>) -> HandlerFuture {
        let mut command = self.command();
        let label = format!("{}#{}", self.source.display(), self.export);
        Box::pin(async move {
            let input = serde_json::to_vec(&args).map_err(|e| HandlerError(e.to_string()))?;
            let mut child = command
                .spawn()
                .map_err(|e| HandlerError(format!("failed to run {label}: {e}")))?;
            if let Some(mut stdin) = child.stdin.take() {
                // A handler that ignores its arguments may exit before reading them.
                match stdin.write_all(&input).await {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => {
                        return Err(HandlerError(format!("failed to write to {label}: {e}")));
                    }
                    _ => {}
                }
            }

            let output = child
                .wait_with_output()
                .await
                .map_err(|e| HandlerError(format!("failed to wait for {label}: {e}")))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(HandlerError(format!(
                    "{label} exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stdout = stdout.trim();
            if stdout.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(stdout)
                .map_err(|e| HandlerError(format!("{label} printed invalid JSON: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_handler_is_callable() {
        let registry = HandlerRegistry::new().with_handler(
            "shop",
            "cart.js",
            "add",
            handler_fn(|args| async move { Ok(json!(args.len())) }),
        );
        let handler = registry
            .resolve("shop", "cart.js", "add", Path::new("apps/shop/cart.js"))
            .unwrap();
        assert_eq!(handler.call(vec![json!(1), json!(2)]).await.unwrap(), json!(2));
    }

    #[test]
    fn missing_export_resolves_to_none() {
        let registry = HandlerRegistry::new();
        assert!(
            registry
                .resolve("shop", "cart.js", "add", Path::new("cart.js"))
                .is_none()
        );
        assert!(registry.is_empty());
    }

    fn script(dir: &Path, body: &str) -> Arc<dyn ServiceHandler> {
        let source = dir.join("cart.sh");
        std::fs::write(&source, body).unwrap();
        CommandHandlerResolver::new()
            .with_interpreter("sh")
            .resolve("shop", "cart.sh", "add", &source)
            .unwrap()
    }

    #[tokio::test]
    async fn command_handler_reads_arguments_from_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let handler = script(
            dir.path(),
            "printf '{\"export\":\"%s\",\"args\":' \"$1\"\ncat\nprintf '}'\n",
        );
        let out = handler.call(vec![json!(1), json!("a")]).await.unwrap();
        assert_eq!(out, json!({ "export": "add", "args": [1, "a"] }));
    }

    #[tokio::test]
    async fn command_handler_runs_in_source_directory() {
        let dir = tempfile::tempdir().unwrap();
        let handler = script(dir.path(), "cat > seen.json\n");
        assert_eq!(handler.call(vec![json!(7)]).await.unwrap(), Value::Null);
        let seen = std::fs::read_to_string(dir.path().join("seen.json")).unwrap();
        assert_eq!(seen, "[7]");
    }

    #[tokio::test]
    async fn command_handler_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let handler = script(dir.path(), "echo 'cart is closed' >&2\nexit 3\n");
        let err = handler.call(vec![]).await.unwrap_err();
        assert!(err.0.contains("cart is closed"), "unexpected error: {err}");

        let handler = script(dir.path(), "echo not-json\n");
        assert!(handler.call(vec![]).await.is_err());
    }
}
