//! Integration tests for proc-runner.

use parking_lot::Mutex;
use proc_runner::{
    BoxError, Context, DynFn, ExitCode, Phase, RawHandler, RunOptions, Runner, Shape, Signature,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Serialize, Deserialize)]
struct Foo {
    bar: i64,
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn counter_handler(counter: &Arc<AtomicUsize>) -> impl Fn(Context) -> futures::future::Ready<()> {
    let counter = Arc::clone(counter);
    move |_ctx: Context| {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(())
    }
}

#[tokio::test]
async fn test_unreadable_config_runs_only_exit_hooks() {
    let fixture = Fixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let exits = Arc::new(AtomicUsize::new(0));

    let mut builder = Runner::builder();
    builder
        .add_config_loader("", counter_handler(&calls))
        .add_client("", counter_handler(&calls))
        .on_start("", counter_handler(&calls))
        .add_server("", counter_handler(&calls))
        .on_exit("", counter_handler(&exits));
    let runner = builder.build();

    let options = RunOptions::new(fixture.dir.path().join("missing.toml"));
    let code = timeout(TEST_TIMEOUT, runner.run(&options)).await.unwrap();

    assert_eq!(code, ExitCode::InvalidConfig);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(exits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unparsable_config_is_invalid_config() {
    let fixture = Fixture::new();
    let path = fixture.file("broken.toml", "[foo\nbar = ");

    let runner = Runner::builder().build();
    let code = runner.run(&RunOptions::new(path)).await;
    assert_eq!(code, ExitCode::InvalidConfig);
}

#[tokio::test]
async fn test_failing_start_hook_skips_servers() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "");
    let servers = Arc::new(AtomicUsize::new(0));
    let later_hooks = Arc::new(AtomicUsize::new(0));
    let exits = Arc::new(AtomicUsize::new(0));

    let mut builder = Runner::builder();
    builder
        .on_start("", |_ctx: Context| async { Err::<(), BoxError>("not ready".into()) })
        .on_start("", counter_handler(&later_hooks))
        .add_server("", counter_handler(&servers))
        .on_exit("", counter_handler(&exits));

    let code = timeout(TEST_TIMEOUT, builder.build().run(&RunOptions::new(path)))
        .await
        .unwrap();

    assert_eq!(code, ExitCode::HandlerError);
    assert_eq!(later_hooks.load(Ordering::SeqCst), 0);
    assert_eq!(servers.load(Ordering::SeqCst), 0);
    assert_eq!(exits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_config_injection() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "[foo]\nbar = 123\n");
    let present = Arc::new(AtomicI64::new(-1));
    let absent = Arc::new(AtomicI64::new(-1));

    let mut builder = Runner::builder();
    let seen = Arc::clone(&present);
    builder.add_client("foo", move |_ctx: Context, foo: Foo| {
        let seen = Arc::clone(&seen);
        async move {
            seen.store(foo.bar, Ordering::SeqCst);
        }
    });
    let seen = Arc::clone(&absent);
    builder.add_client("does.not.exist", move |_ctx: Context, foo: Foo| {
        let seen = Arc::clone(&seen);
        async move {
            seen.store(foo.bar, Ordering::SeqCst);
        }
    });

    let code = builder.build().run(&RunOptions::new(path)).await;
    assert_eq!(code, ExitCode::Ok);
    assert_eq!(present.load(Ordering::SeqCst), 123);
    assert_eq!(absent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_section_is_invalid_config() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "[foo]\nbar = \"one two three\"\n");
    let invoked = Arc::new(AtomicBool::new(false));

    let mut builder = Runner::builder();
    let flag = Arc::clone(&invoked);
    builder.add_client("foo", move |_ctx: Context, _foo: Foo| {
        flag.store(true, Ordering::SeqCst);
        async {}
    });

    let code = builder.build().run(&RunOptions::new(path)).await;
    assert_eq!(code, ExitCode::InvalidConfig);
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_ext_config_overrides_base() {
    let fixture = Fixture::new();
    let base = fixture.file("service.toml", "[foo]\nbar = 1\n");
    let ext = fixture.file("ext.json", r#"{"foo": {"bar": 2}}"#);

    let mut builder = Runner::builder();
    let foo = builder.load_config::<Foo>("foo");
    let options = RunOptions::new(base).with_ext_config(ext);

    assert_eq!(builder.build().run(&options).await, ExitCode::Ok);
    assert_eq!(foo.get().unwrap().bar, 2);
}

#[tokio::test]
async fn test_missing_ext_config_is_invalid_config() {
    let fixture = Fixture::new();
    let base = fixture.file("service.toml", "");
    let options = RunOptions::new(base).with_ext_config(fixture.dir.path().join("nope.toml"));

    assert_eq!(Runner::builder().build().run(&options).await, ExitCode::InvalidConfig);
}

#[tokio::test]
async fn test_invalid_handler_is_reported_at_run_time() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "");
    let servers = Arc::new(AtomicUsize::new(0));

    // Zero parameters: rejected by validation, but registration itself succeeds.
    let no_params = DynFn::new(Signature::new(), |_args| async { Ok(Vec::new()) });

    let mut builder = Runner::builder();
    builder
        .add_client("", no_params)
        .add_server("", counter_handler(&servers));
    let runner = builder.build();
    assert_eq!(runner.registry(Phase::Clients).len(), 1);

    let code = runner.run(&RunOptions::new(path)).await;
    assert_eq!(code, ExitCode::InvalidHandler);
    assert_eq!(servers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dynamic_handler_with_config() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "[foo]\nbar = 5\n");
    let seen = Arc::new(AtomicI64::new(0));

    let sig = Signature::new()
        .param(Shape::Context)
        .param(Shape::config::<Foo>())
        .result(Shape::Error);
    let sink = Arc::clone(&seen);
    let handler = DynFn::new(sig, move |mut args| {
        let sink = Arc::clone(&sink);
        async move {
            let foo = proc_runner::handler::downcast_arg::<Foo>(args.pop(), 1)?;
            sink.store(foo.bar, Ordering::SeqCst);
            let outcome: Option<BoxError> = None;
            let results: Vec<proc_runner::handler::DynValue> = vec![Box::new(outcome)];
            Ok::<_, proc_runner::Error>(results)
        }
    });

    let mut builder = Runner::builder();
    builder.on_start("foo", RawHandler::from(handler));

    assert_eq!(builder.build().run(&RunOptions::new(path)).await, ExitCode::Ok);
    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_servers_report_lowest_index_failure() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "");
    let finished = Arc::new(AtomicUsize::new(0));

    let mut builder = Runner::builder();
    for (delay, fail) in [(50_u64, false), (40, true), (1, true)] {
        let finished = Arc::clone(&finished);
        builder.add_server("", move |_ctx: Context| {
            let finished = Arc::clone(&finished);
            async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err::<(), BoxError>(format!("server failed after {delay}ms").into())
                } else {
                    Ok(())
                }
            }
        });
    }

    let code = timeout(TEST_TIMEOUT, builder.build().run(&RunOptions::new(path)))
        .await
        .unwrap();
    assert_eq!(code, ExitCode::HandlerError);
    assert_eq!(finished.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_server_does_not_stop_siblings() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "");
    let sibling_done = Arc::new(AtomicBool::new(false));
    let exits = Arc::new(AtomicUsize::new(0));

    let mut builder = Runner::builder();
    builder.add_server("", |ctx: Context| async move {
        let ports: Vec<u16> = Vec::new();
        ctx.stats().set("port", i64::from(ports[0]));
    });
    let done = Arc::clone(&sibling_done);
    builder.add_server("", move |ctx: Context| {
        let done = Arc::clone(&done);
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            ctx.stats().add("served", 1);
            done.store(true, Ordering::SeqCst);
        }
    });
    builder.on_exit("", counter_handler(&exits));

    let code = timeout(TEST_TIMEOUT, builder.build().run(&RunOptions::new(path)))
        .await
        .unwrap();
    assert_eq!(code, ExitCode::HandlerError);
    assert!(sibling_done.load(Ordering::SeqCst));
    assert_eq!(exits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_servers_is_ok() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "");
    let exits = Arc::new(AtomicUsize::new(0));

    let mut builder = Runner::builder();
    builder.on_exit("", counter_handler(&exits));

    assert_eq!(builder.build().run(&RunOptions::new(path)).await, ExitCode::Ok);
    assert_eq!(exits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_server_holds_the_run() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "");
    let release = Arc::new(Notify::new());

    let mut builder = Runner::builder();
    let gate = Arc::clone(&release);
    builder
        .add_server("", move |_ctx: Context| {
            let gate = Arc::clone(&gate);
            async move { gate.notified().await }
        })
        .add_server("", |_ctx: Context| async {});
    let runner = Arc::new(builder.build());

    let task = tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run(&RunOptions::new(path)).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!task.is_finished());

    release.notify_one();
    let code = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(code, ExitCode::Ok);
}

#[tokio::test]
async fn test_context_meta_and_stats() {
    let fixture = Fixture::new();
    let path = fixture.file("service.toml", "");
    let seen = Arc::new(Mutex::new(None));

    let mut builder = Runner::builder();
    let sink = Arc::clone(&seen);
    builder.add_server("", move |ctx: Context| {
        let sink = Arc::clone(&sink);
        async move {
            ctx.stats().add("requests", 2);
            *sink.lock() = Some((
                ctx.meta().project.clone(),
                ctx.stats().is_enabled(),
                ctx.stats().snapshot(),
            ));
        }
    });

    let meta = proc_runner::Meta {
        project: "integration".into(),
        ..proc_runner::Meta::default()
    };
    let options = RunOptions::new(path).with_meta(meta);
    assert_eq!(builder.build().run(&options).await, ExitCode::Ok);

    let (project, enabled, stats) = seen.lock().take().unwrap();
    assert_eq!(project, "integration");
    assert!(enabled);
    assert_eq!(stats, vec![("requests".to_owned(), 2)]);
}

#[tokio::test]
async fn test_log_file_from_config() {
    let fixture = Fixture::new();
    let log_path = fixture.dir.path().join("logs").join("service.log");
    let path = fixture.file(
        "service.toml",
        &format!("[log]\nlevel = \"debug\"\nfile = {:?}\n", log_path.display().to_string()),
    );

    let runner = Runner::builder().build();
    assert_eq!(runner.run(&RunOptions::new(path)).await, ExitCode::Ok);
    assert!(log_path.exists());
}

#[tokio::test]
async fn test_unopenable_log_file_is_invalid_config() {
    let fixture = Fixture::new();
    let exits = Arc::new(AtomicUsize::new(0));
    // A directory cannot be opened as the log file.
    let path = fixture.file(
        "service.toml",
        &format!("[log]\nfile = {:?}\n", fixture.dir.path().display().to_string()),
    );

    let mut builder = Runner::builder();
    builder.on_exit("", counter_handler(&exits));

    let code = builder.build().run(&RunOptions::new(path)).await;
    assert_eq!(code, ExitCode::InvalidConfig);
    assert_eq!(exits.load(Ordering::SeqCst), 1);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sighup_rotates_log_file() {
    use tokio::signal::unix::{signal, SignalKind};

    let fixture = Fixture::new();
    let log_path = fixture.dir.path().join("svc.log");
    let rotated = fixture.dir.path().join("svc.log.1");
    let path = fixture.file(
        "service.toml",
        &format!("[log]\nfile = {:?}\nmax_files = 2\n", log_path.display().to_string()),
    );

    // Keep SIGHUP from terminating the test process before the runner listens.
    let _hangup = signal(SignalKind::hangup()).unwrap();

    let mut builder = Runner::builder();
    let target = rotated.clone();
    builder.add_server("", move |_ctx: Context| {
        let target = target.clone();
        async move {
            // The monitor may start listening after the first signal; resend until rotated.
            for attempt in 0..200 {
                if attempt % 20 == 0 && !send_hangup() {
                    return Err::<(), BoxError>("kill -HUP failed".into());
                }
                if target.exists() {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err("log file was not rotated".into())
        }
    });

    let code = timeout(TEST_TIMEOUT, builder.build().run(&RunOptions::new(path)))
        .await
        .unwrap();

    assert_eq!(code, ExitCode::Ok);
    assert!(rotated.exists());
    assert!(log_path.exists());
}

#[cfg(unix)]
fn send_hangup() -> bool {
    std::process::Command::new("kill")
        .args(["-HUP", &std::process::id().to_string()])
        .status()
        .is_ok_and(|status| status.success())
}
