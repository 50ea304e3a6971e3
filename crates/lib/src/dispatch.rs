//! Task pipeline: translate, sanitize, execute. Stops at the first failure.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{self, Config};
use crate::exec::{ExecutionResult, Supervisor};
use crate::llm::{self, TranslateError, Translator};
use crate::registry::ScriptRegistry;
use crate::sanitize::{Rejection, Sanitizer, SanitizedCommand};

/// Why a task did not reach the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("task is empty")]
    EmptyTask,
    #[error("translation failed: {0}")]
    Translation(#[from] TranslateError),
    #[error("command rejected: {0}")]
    Rejected(#[from] Rejection),
}

/// Owns the translator, sanitizer and supervisor for the lifetime of the process.
#[derive(Clone)]
pub struct Dispatcher {
    translator: Arc<dyn Translator>,
    sanitizer: Arc<Sanitizer>,
    supervisor: Arc<Supervisor>,
    /// Registry rendering, computed once; the date line is prepended per task.
    rendering: Arc<str>,
}

impl Dispatcher {
    pub fn new(translator: Arc<dyn Translator>, sanitizer: Sanitizer, supervisor: Supervisor) -> Self {
        let rendering = sanitizer
            .registry()
            .render(sanitizer.scripts_dir(), sanitizer.data_root());
        Self {
            translator,
            sanitizer: Arc::new(sanitizer),
            supervisor: Arc::new(supervisor),
            rendering: rendering.into(),
        }
    }

    /// Build registry, sanitizer, supervisor and translator from config.
    /// The scripts directory must exist; missing script files only produce a warning.
    pub fn from_config(config: &Config, config_path: &Path) -> Result<Self> {
        let registry = Arc::new(load_registry(config, config_path)?);
        let scripts_dir = resolve_existing_scripts_dir(config, config_path)?;
        let data_root = absolute_data_root(config);
        for name in registry.missing_files(&scripts_dir) {
            log::warn!(
                "registered script {} not found in {}",
                name,
                scripts_dir.display()
            );
        }
        let sanitizer = Sanitizer::new(registry, &scripts_dir, &data_root)?;
        let supervisor = Supervisor::new(
            config.execution.interpreter.clone(),
            config.execution.timeout(),
            config.execution.max_output_bytes,
        )
        .with_working_dir(data_root);
        let translator = llm::translator_from_config(config);
        log::info!(
            "dispatcher ready: {} script(s) in {}, translator {}",
            sanitizer.registry().specs().len(),
            scripts_dir.display(),
            translator.describe()
        );
        Ok(Self::new(translator, sanitizer, supervisor))
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn translator(&self) -> &dyn Translator {
        self.translator.as_ref()
    }

    /// System instruction sent with every task, dated `today` (YYYY-MM-DD).
    pub fn system_instruction(&self, today: &str) -> String {
        llm::system_instruction(&self.rendering, self.sanitizer.data_root(), today)
    }

    /// Translate and sanitize only; nothing is executed.
    pub async fn plan(&self, task: &str) -> Result<SanitizedCommand, DispatchError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(DispatchError::EmptyTask);
        }
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let system = self.system_instruction(&today);
        let candidate = self.translator.translate(&system, task).await?;
        log::debug!("candidate command: {:?}", candidate.as_str());
        Ok(self.sanitizer.sanitize(&candidate)?)
    }

    /// Run one task end to end. Execution outcomes (including timeout and launch errors) are
    /// reported in the [`ExecutionResult`], not as errors.
    pub async fn run_task(&self, task: &str) -> Result<ExecutionResult, DispatchError> {
        let id = request_id();
        log::info!("[{}] task: {:?}", id, task.trim());
        let command = match self.plan(task).await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[{}] {}", id, e);
                return Err(e);
            }
        };
        log::info!("[{}] running {}", id, command);
        let result = self.supervisor.execute(command).await;
        log::info!(
            "[{}] {} in {}ms",
            id,
            result.outcome.as_str(),
            result.elapsed.as_millis()
        );
        Ok(result)
    }
}

/// Short id tying the log lines of one task together.
fn request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// The catalog from `registry.catalog` when set, otherwise the built-in one.
pub fn load_registry(config: &Config, config_path: &Path) -> Result<ScriptRegistry> {
    match config::resolve_catalog_path(config, config_path) {
        Some(path) => ScriptRegistry::load(&path)
            .with_context(|| format!("loading script catalog {}", path.display())),
        None => ScriptRegistry::builtin().context("loading built-in script catalog"),
    }
}

fn resolve_existing_scripts_dir(config: &Config, config_path: &Path) -> Result<PathBuf> {
    let dir = config::resolve_scripts_dir(config, config_path);
    std::fs::canonicalize(&dir).with_context(|| {
        format!(
            "scripts directory {} not found; run `taskgate init` first",
            dir.display()
        )
    })
}

/// Canonical data root when it exists, otherwise the configured path as-is.
fn absolute_data_root(config: &Config) -> PathBuf {
    std::fs::canonicalize(&config.data.root).unwrap_or_else(|_| config.data.root.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Outcome;
    use crate::llm::CandidateCommand;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns a fixed reply (with `{scripts}` and `{data}` filled in) and records what it was sent.
    struct StubTranslator {
        reply: Result<String, ()>,
        calls: AtomicUsize,
        last_system: Mutex<String>,
    }

    #[async_trait]
    impl Translator for StubTranslator {
        async fn translate(&self, system: &str, _task: &str) -> Result<CandidateCommand, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_system.lock().expect("lock") = system.to_string();
            match &self.reply {
                Ok(s) => Ok(CandidateCommand::new(s.clone())),
                Err(()) => Err(TranslateError::Timeout(Duration::from_secs(15))),
            }
        }

        fn describe(&self) -> String {
            "stub".to_string()
        }
    }

    struct Fixture {
        dir: PathBuf,
        stub: Arc<StubTranslator>,
        dispatcher: Dispatcher,
    }

    impl Fixture {
        /// Installs the bundled scripts into `<dir>/scripts` and uses `<dir>/data` as data root.
        fn new(reply: Result<&str, ()>) -> Self {
            let dir = std::env::temp_dir().join(format!("taskgate-dispatch-test-{}", uuid::Uuid::new_v4()));
            let scripts = dir.join("scripts");
            let data = dir.join("data");
            std::fs::create_dir_all(&data).expect("create data dir");
            crate::init::install_bundled_scripts(&scripts).expect("install scripts");
            let reply = reply.map(|r| {
                r.replace("{scripts}", &scripts.display().to_string())
                    .replace("{data}", &data.display().to_string())
            });
            let stub = Arc::new(StubTranslator {
                reply,
                calls: AtomicUsize::new(0),
                last_system: Mutex::new(String::new()),
            });
            let registry = Arc::new(ScriptRegistry::builtin().expect("builtin catalog"));
            let sanitizer = Sanitizer::new(registry, &scripts, &data).expect("sanitizer");
            let supervisor = Supervisor::new("sh", Duration::from_secs(10), 1024 * 1024).with_working_dir(data);
            let dispatcher = Dispatcher::new(stub.clone(), sanitizer, supervisor);
            Self { dir, stub, dispatcher }
        }

        fn data(&self) -> PathBuf {
            self.dir.join("data")
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    #[tokio::test]
    async fn counts_fridays_end_to_end() {
        // Underscores are outside the approved set, so the model's `friday_counts.txt` loses it.
        let fx = Fixture::new(Ok(
            "{scripts}/count-weekday.sh Friday {data}/dates.txt {data}/friday_counts.txt",
        ));
        std::fs::write(
            fx.data().join("dates.txt"),
            "2024-01-05\n2024-01-06\n2024-01-12\n2024-02-02\n",
        )
        .expect("write dates");

        let res = fx
            .dispatcher
            .run_task("Count the number of Fridays in /data/dates.txt and write the count to /data/friday_counts.txt")
            .await
            .expect("dispatched");
        assert_eq!(res.outcome, Outcome::Success, "stderr: {}", res.stderr);
        assert_eq!(res.stderr, "");
        assert_eq!(res.command.script(), "count-weekday.sh");
        let written = std::fs::read_to_string(fx.data().join("fridaycounts.txt")).expect("output file");
        assert_eq!(written.trim(), "3");
    }

    #[tokio::test]
    async fn system_instruction_lists_scripts_and_date() {
        let fx = Fixture::new(Ok("{scripts}/extract-emails.sh {data}/a.txt {data}/b.txt"));
        std::fs::write(fx.data().join("a.txt"), "mail bob@example.com please\n").expect("write input");
        let res = fx.dispatcher.run_task("collect the emails").await.expect("dispatched");
        assert_eq!(res.outcome, Outcome::Success, "stderr: {}", res.stderr);
        let system = fx.stub.last_system.lock().expect("lock").clone();
        assert!(system.starts_with("Today's date: "));
        assert!(system.contains("### count-weekday.sh"));
        assert!(system.contains("### extract-emails.sh"));
        assert_eq!(
            std::fs::read_to_string(fx.data().join("b.txt")).expect("output").trim(),
            "bob@example.com"
        );
    }

    #[tokio::test]
    async fn blank_task_never_reaches_translator() {
        let fx = Fixture::new(Ok("unused"));
        assert!(matches!(fx.dispatcher.run_task("  \n ").await, Err(DispatchError::EmptyTask)));
        assert_eq!(fx.stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn translator_failure_stops_the_pipeline() {
        let fx = Fixture::new(Err(()));
        let err = fx.dispatcher.run_task("count fridays").await.expect_err("failure");
        assert!(matches!(err, DispatchError::Translation(TranslateError::Timeout(_))));
    }

    #[tokio::test]
    async fn injected_command_is_neutralised() {
        // `;` and `&` are stripped; what remains is extra words the contract does not allow.
        let fx = Fixture::new(Ok("{scripts}/extract-emails.sh {data}/a.txt {data}/b.txt; rm -rf {data}"));
        let err = fx.dispatcher.run_task("collect the emails").await.expect_err("rejected");
        assert!(matches!(err, DispatchError::Rejected(Rejection::TooManyArguments { .. })));
    }

    #[tokio::test]
    async fn unregistered_script_is_rejected() {
        let fx = Fixture::new(Ok("{scripts}/wipe.sh {data}"));
        let err = fx.dispatcher.run_task("wipe everything").await.expect_err("rejected");
        assert_eq!(
            err.to_string(),
            "command rejected: script is not registered: wipe.sh"
        );
    }

    #[test]
    fn request_ids_are_short_and_distinct() {
        let a = request_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, request_id());
    }
}
