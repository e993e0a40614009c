//! The orchestrator: registration builder and the phase sequence of a run.

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigSlot, SectionConfig};
use crate::context::Context;
use crate::error::Result;
use crate::exit::ExitCode;
use crate::handler::{validate, IntoHandler, RawHandler};
use crate::logging::{bootstrap_dispatch, LogConfig, Logger};
use crate::meta::Meta;
use crate::registry::{Phase, Registry};
use crate::signal::SignalMonitor;
use crate::stats::Stats;
use crate::wrapper::Wrapper;
use crate::{DEFAULT_CONFIG_FILE, EXT_CONFIG_ENV, LOG_SECTION};

#[derive(Debug, Clone)]
struct Phases {
    config_loaders: Registry,
    clients: Registry,
    on_start: Registry,
    servers: Registry,
    on_exit: Registry,
}

impl Default for Phases {
    fn default() -> Self {
        Self {
            config_loaders: Registry::new(Phase::ConfigLoaders),
            clients: Registry::new(Phase::Clients),
            on_start: Registry::new(Phase::OnStart),
            servers: Registry::new(Phase::Servers),
            on_exit: Registry::new(Phase::OnExit),
        }
    }
}

impl Phases {
    fn get(&self, phase: Phase) -> &Registry {
        match phase {
            Phase::ConfigLoaders => &self.config_loaders,
            Phase::Clients => &self.clients,
            Phase::OnStart => &self.on_start,
            Phase::Servers => &self.servers,
            Phase::OnExit => &self.on_exit,
        }
    }

    fn get_mut(&mut self, phase: Phase) -> &mut Registry {
        match phase {
            Phase::ConfigLoaders => &mut self.config_loaders,
            Phase::Clients => &mut self.clients,
            Phase::OnStart => &mut self.on_start,
            Phase::Servers => &mut self.servers,
            Phase::OnExit => &mut self.on_exit,
        }
    }
}

/// Collects handlers for every phase.
///
/// Each registration validates the handler right away. A rejected handler
/// is not dropped: it is replaced by a placeholder that reports the error
/// and the registration site when the run reaches it.
#[derive(Debug, Default)]
pub struct RunnerBuilder {
    phases: Phases,
}

impl RunnerBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration loader.
    #[track_caller]
    pub fn add_config_loader<H, M>(&mut self, section: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<M>,
    {
        self.register(Phase::ConfigLoaders, section, handler.into_raw(), Location::caller())
    }

    /// Register a client initializer.
    #[track_caller]
    pub fn add_client<H, M>(&mut self, section: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<M>,
    {
        self.register(Phase::Clients, section, handler.into_raw(), Location::caller())
    }

    /// Register a start hook.
    #[track_caller]
    pub fn on_start<H, M>(&mut self, section: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<M>,
    {
        self.register(Phase::OnStart, section, handler.into_raw(), Location::caller())
    }

    /// Register a server. Servers run concurrently and the run waits for
    /// all of them.
    #[track_caller]
    pub fn add_server<H, M>(&mut self, section: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<M>,
    {
        self.register(Phase::Servers, section, handler.into_raw(), Location::caller())
    }

    /// Register an exit hook. Exit hooks run at the end of every run.
    #[track_caller]
    pub fn on_exit<H, M>(&mut self, section: &str, handler: H) -> &mut Self
    where
        H: IntoHandler<M>,
    {
        self.register(Phase::OnExit, section, handler.into_raw(), Location::caller())
    }

    /// Register a configuration loader that fills a slot from `section` of
    /// the run configuration.
    ///
    /// The slot stays empty when the section is absent.
    #[track_caller]
    pub fn load_config<T: SectionConfig>(&mut self, section: &str) -> ConfigSlot<T> {
        let slot = ConfigSlot::new();
        let target = slot.clone();
        let section: Arc<str> = Arc::from(section);

        self.phases
            .config_loaders
            .push(Wrapper::from_fn(Location::caller(), move |ctx: Context| {
                let target = target.clone();
                let section = Arc::clone(&section);
                async move {
                    let loaded = ctx.config().unmarshal::<T>(&section);
                    fill_slot(&target, loaded, &section, None)
                }
            }));
        slot
    }

    /// Register a configuration loader that fills a slot from `section` of
    /// a separate file.
    ///
    /// The file is read when the config-loader phase runs.
    #[track_caller]
    pub fn load_config_file<T, P>(&mut self, path: P, section: &str) -> ConfigSlot<T>
    where
        T: SectionConfig,
        P: AsRef<Path>,
    {
        let slot = ConfigSlot::new();
        let target = slot.clone();
        let section: Arc<str> = Arc::from(section);
        let path: Arc<Path> = Arc::from(path.as_ref());

        self.phases
            .config_loaders
            .push(Wrapper::from_fn(Location::caller(), move |_ctx: Context| {
                let target = target.clone();
                let section = Arc::clone(&section);
                let path = Arc::clone(&path);
                async move {
                    let loaded = Config::load_file(&path).and_then(|c| c.unmarshal::<T>(&section));
                    fill_slot(&target, loaded, &section, Some(&*path))
                }
            }));
        slot
    }

    /// Finish registration.
    ///
    /// The builder is left empty and can be reused.
    pub fn build(&mut self) -> Runner {
        Runner {
            phases: std::mem::take(&mut self.phases),
        }
    }

    fn register(
        &mut self,
        phase: Phase,
        section: &str,
        raw: RawHandler,
        caller: &'static Location<'static>,
    ) -> &mut Self {
        let wrapper = match validate(section, raw) {
            Ok(handler) => Wrapper::from_handler(handler, caller),
            Err(e) => Wrapper::invalid(e, caller),
        };
        self.phases.get_mut(phase).push(wrapper);
        self
    }
}

fn fill_slot<T>(
    slot: &ConfigSlot<T>,
    loaded: Result<Option<T>>,
    section: &str,
    path: Option<&Path>,
) -> ExitCode {
    match loaded {
        Ok(value) => {
            slot.store(value);
            ExitCode::Ok
        }
        Err(e) => {
            error!(
                section,
                path = ?path,
                error = %e,
                "Failed to load configuration section"
            );
            ExitCode::InvalidConfig
        }
    }
}

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Base configuration file
    pub config_path: PathBuf,
    /// Extension file merged over the base configuration
    pub ext_config: Option<PathBuf>,
    /// Project metadata exposed through the context
    pub meta: Meta,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_FILE)
    }
}

impl RunOptions {
    /// Options for `config_path` with default metadata.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(config_path: P) -> Self {
        Self {
            config_path: config_path.into(),
            ext_config: None,
            meta: Meta::default(),
        }
    }

    /// Merge `path` over the base configuration.
    #[must_use]
    pub fn with_ext_config<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.ext_config = Some(path.into());
        self
    }

    /// Take the extension file from the `PROC_RUNNER_EXT_CONFIG` variable,
    /// if set and non-empty.
    #[must_use]
    pub fn with_env_ext_config(mut self) -> Self {
        if let Some(path) = std::env::var_os(EXT_CONFIG_ENV).filter(|v| !v.is_empty()) {
            self.ext_config = Some(PathBuf::from(path));
        }
        self
    }

    /// Use `meta` as the project metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }
}

/// A fully registered process lifecycle.
///
/// A run goes through these steps:
///
/// 1. load the base configuration and merge the extension file;
/// 2. install the logger from the `log` section;
/// 3. run config loaders, clients and start hooks one by one, stopping at
///    the first failure;
/// 4. run all servers concurrently and wait for every one of them;
/// 5. run exit hooks and flush logs, whatever happened before.
///
/// Failures in steps 1 and 2 yield [`ExitCode::InvalidConfig`] and skip
/// straight to the exit hooks, which then see an empty configuration.
#[derive(Debug, Clone)]
pub struct Runner {
    phases: Phases,
}

impl Runner {
    /// Start registering handlers.
    #[must_use]
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::new()
    }

    /// The registry of `phase`.
    #[must_use]
    pub fn registry(&self, phase: Phase) -> &Registry {
        self.phases.get(phase)
    }

    /// Execute one run and return its exit code.
    pub async fn run(&self, options: &RunOptions) -> ExitCode {
        let bootstrap = bootstrap_dispatch();

        let prepared = tracing::dispatcher::with_default(&bootstrap, || {
            prepare(options).map_err(|e| {
                error!(
                    config = %options.config_path.display(),
                    code = %e.code(),
                    error = %e,
                    "Failed to prepare run"
                );
                e.exit_code()
            })
        });

        let (ctx, logger) = match prepared {
            Ok(prepared) => prepared,
            Err(code) => {
                let ctx = Context::new(Config::empty(), options.meta.clone());
                return self
                    .finish(code, &ctx, &Logger::default())
                    .with_subscriber(bootstrap)
                    .await;
            }
        };

        info!(
            project = %ctx.meta().project,
            revision = %ctx.meta().git_revision,
            sources = ?ctx.config().sources(),
            "Runner is starting"
        );

        let ctx = ctx.with_stats(Stats::new());
        let signals = Arc::new(SignalMonitor::new(logger.clone())).spawn();
        let code = self.run_phases(&ctx).await;
        signals.stop().await;

        self.finish(code, &ctx, &logger).await
    }

    async fn run_phases(&self, ctx: &Context) -> ExitCode {
        for registry in [
            &self.phases.config_loaders,
            &self.phases.clients,
            &self.phases.on_start,
        ] {
            let code = registry.run_sequential(ctx).await;
            if !code.is_ok() {
                return code;
            }
        }
        self.phases.servers.run_parallel(ctx).await
    }

    async fn finish(&self, code: ExitCode, ctx: &Context, logger: &Logger) -> ExitCode {
        let exit_code = self.phases.on_exit.run_sequential(ctx).await;
        let code = if code.is_ok() { exit_code } else { code };

        let stats = ctx.stats().snapshot();
        if !stats.is_empty() {
            info!(stats = ?stats, "Runner stats");
        }
        warn!(code = %code, "Runner is exiting");
        logger.flush();
        code
    }
}

fn prepare(options: &RunOptions) -> Result<(Context, Logger)> {
    let mut config = Config::load_file(&options.config_path)?;
    if let Some(ext) = &options.ext_config {
        config.merge_file(ext)?;
    }

    let log_config: LogConfig = config.unmarshal(LOG_SECTION)?.unwrap_or_default();
    let logger = Logger::init(&log_config)?;

    Ok((Context::new(config, options.meta.clone()), logger))
}
