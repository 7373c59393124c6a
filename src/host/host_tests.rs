use super::*;
use crate::controller::ControllerEvent;
use crate::protocol::PROCESS_FINISHED;
use crate::test_support::ScriptProbe;
use std::fs;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

struct Fixture {
    _root: tempfile::TempDir,
    probe: ScriptProbe,
    workspace: Workspace,
    rx: Receiver<ControllerEvent>,
    host: Host,
}

fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(root.path().join("work"), root.path().join("store"), 1_000_000);
    let probe = ScriptProbe::default();
    let (tx, rx) = mpsc::channel();
    let host = Host::new(
        Box::new(probe.interpreter(workspace.work_dir())),
        workspace.clone(),
        Outbox::new(1, tx),
    );
    Fixture {
        _root: root,
        probe,
        workspace,
        rx,
        host,
    }
}

fn ready() -> Fixture {
    let mut f = fixture();
    f.host.dispatch(HostMessage::Init {
        buffer: None,
        offline: false,
    });
    assert_eq!(f.host.state(), HostState::Ready);
    drain(&f.rx);
    f
}

fn drain(rx: &Receiver<ControllerEvent>) -> Vec<ControllerMessage> {
    rx.try_iter()
        .filter_map(|event| match event {
            ControllerEvent::Host { message, .. } => Some(message),
            _ => None,
        })
        .collect()
}

fn run(f: &mut Fixture, source: &str) -> Vec<ControllerMessage> {
    f.host.dispatch(HostMessage::Run {
        content: source.to_string(),
    });
    drain(&f.rx)
}

fn finished_count(messages: &[ControllerMessage]) -> usize {
    messages.iter().filter(|m| m.is_process_finished()).count()
}

#[test]
fn test_init_mounts_storage_and_reports_loaded() {
    let mut f = fixture();
    f.host.dispatch(HostMessage::Init {
        buffer: None,
        offline: false,
    });
    let messages = drain(&f.rx);
    assert_eq!(
        messages,
        vec![
            ControllerMessage::system("Local Persistent Storage Loaded.\n"),
            ControllerMessage::Loaded,
        ]
    );
    assert!(f.workspace.persistent_dir().is_dir());
}

#[test]
fn test_offline_init_mentions_skipped_package_manager() {
    let mut f = fixture();
    f.host.dispatch(HostMessage::Init {
        buffer: None,
        offline: true,
    });
    let messages = drain(&f.rx);
    assert_eq!(
        messages[0],
        ControllerMessage::system("Offline Mode: Skipping Package Manager.\n")
    );
    assert_eq!(messages.last(), Some(&ControllerMessage::Loaded));

    f.host.dispatch(HostMessage::Install {
        content: "requests".into(),
    });
    assert!(matches!(
        &drain(&f.rx)[..],
        [ControllerMessage::Output { error: true, .. }]
    ));
    assert!(f.probe.installs().is_empty());
}

#[test]
fn test_failed_init_is_terminal() {
    let mut f = fixture();
    f.probe.set_fail_load(true);
    f.host.dispatch(HostMessage::Init {
        buffer: None,
        offline: false,
    });
    let messages = drain(&f.rx);
    assert!(matches!(
        &messages[..],
        [ControllerMessage::Output { content, error: true, .. }] if content.contains("runtime download failed")
    ));
    assert_eq!(f.host.state(), HostState::Failed);

    // Retrying on the same host is refused, and RUN is dropped
    f.probe.set_fail_load(false);
    f.host.dispatch(HostMessage::Init {
        buffer: None,
        offline: false,
    });
    assert_eq!(f.host.state(), HostState::Failed);
    assert_eq!(f.probe.loads(), 1);
    assert!(run(&mut f, "print hi").iter().all(|m| !m.is_process_finished()));
}

#[test]
fn test_messages_before_init_are_dropped() {
    let mut f = fixture();
    f.host.dispatch(HostMessage::ScanFiles);
    assert!(run(&mut f, "print hi").is_empty());
    assert!(drain(&f.rx).is_empty());
    assert!(f.probe.runs().is_empty());
}

#[test]
fn test_successful_run_ends_with_single_finished() {
    let mut f = ready();
    let messages = run(&mut f, "print one\nwrite two");
    assert_eq!(
        messages,
        vec![
            ControllerMessage::stdout("one\n"),
            ControllerMessage::stdout("two"),
            ControllerMessage::process_finished(),
        ]
    );
    assert_eq!(f.host.state(), HostState::Ready);
}

#[test]
fn test_runtime_error_goes_to_stderr_then_finished() {
    let mut f = ready();
    let messages = run(&mut f, "print before\nfail boom\nprint after");
    assert_eq!(messages[0], ControllerMessage::stdout("before\n"));
    assert!(matches!(
        &messages[1],
        ControllerMessage::Output { content, error: true, system: false } if content.contains("RuntimeError: boom")
    ));
    assert_eq!(messages.len(), 3);
    assert_eq!(finished_count(&messages), 1);
}

#[test]
fn test_syntax_error_is_structured() {
    let mut f = ready();
    let messages = run(&mut f, "print ok\n  print indented");
    assert_eq!(
        messages[0],
        ControllerMessage::Error {
            error: ErrorDetail {
                kind: "IndentationError".into(),
                lineno: Some(2),
                msg: "unexpected indent".into(),
            }
        }
    );
    assert!(matches!(&messages[1], ControllerMessage::Output { error: true, .. }));
    assert_eq!(messages.last(), Some(&ControllerMessage::process_finished()));
    assert_eq!(finished_count(&messages), 1);
}

#[test]
fn test_run_without_channel_gets_eof() {
    let mut f = ready();
    let messages = run(&mut f, "input name");
    assert!(matches!(
        &messages[0],
        ControllerMessage::Output { content, error: true, .. } if content.contains("EOFError")
    ));
    assert_eq!(finished_count(&messages), 1);
}

#[test]
fn test_run_persists_new_files_to_store() {
    let mut f = ready();
    run(&mut f, "file result.txt 42");
    assert_eq!(
        fs::read_to_string(f.workspace.persistent_dir().join("result.txt")).unwrap(),
        "42"
    );
}

#[test]
fn test_lint_reports() {
    let mut f = ready();

    f.host.dispatch(HostMessage::Lint {
        content: "print fine".into(),
    });
    f.host.dispatch(HostMessage::Lint {
        content: "print fine\nbogus statement".into(),
    });
    f.host.dispatch(HostMessage::Lint {
        content: "print \0".into(),
    });

    let reports: Vec<LintReport> = drain(&f.rx)
        .into_iter()
        .map(|m| match m {
            ControllerMessage::LintResult { content } => LintReport::from_json(&content).unwrap(),
            other => panic!("unexpected message: {:?}", other),
        })
        .collect();

    assert_eq!(reports[0], LintReport::clean());
    assert!(reports[1].error);
    assert_eq!(reports[1].lineno, Some(2));
    assert_eq!(reports[1].offset, Some(1));
    assert_eq!(reports[1].msg.as_deref(), Some("invalid syntax"));
    // Parser crashes other than syntax errors don't block typing
    assert_eq!(reports[2], LintReport::clean());
    assert!(f.probe.runs().is_empty());
}

#[test]
fn test_install_reports_success_and_failure() {
    let mut f = ready();
    f.host.dispatch(HostMessage::Install {
        content: "numpy".into(),
    });
    f.host.dispatch(HostMessage::Install {
        content: "badpkg".into(),
    });
    let messages = drain(&f.rx);
    assert_eq!(
        messages[0],
        ControllerMessage::system("Successfully installed numpy\n")
    );
    assert!(matches!(
        &messages[1],
        ControllerMessage::Output { content, error: true, .. } if content.starts_with("Failed to install badpkg")
    ));
}

#[test]
fn test_restore_packages() {
    let mut f = ready();
    f.host.dispatch(HostMessage::RestorePackages { content: vec![] });
    assert!(drain(&f.rx).is_empty());

    f.host.dispatch(HostMessage::RestorePackages {
        content: vec!["numpy".into(), "pandas".into()],
    });
    assert_eq!(
        drain(&f.rx),
        vec![
            ControllerMessage::system("Restoring installed packages...\n"),
            ControllerMessage::system("Packages restored.\n"),
        ]
    );
    assert_eq!(f.probe.installs(), vec!["numpy", "pandas"]);

    f.host.dispatch(HostMessage::RestorePackages {
        content: vec!["badpkg".into(), "never".into()],
    });
    let messages = drain(&f.rx);
    assert!(matches!(
        &messages[1],
        ControllerMessage::Output { content, error: true, .. } if content.starts_with("Failed to restore packages")
    ));
    assert!(!f.probe.installs().contains(&"never".to_string()));
}

#[test]
fn test_sync_reports_each_failed_file_and_writes_the_rest() {
    let mut f = ready();
    fs::write(f.workspace.work_dir().join("blocked"), "file").unwrap();
    let files = FileMap::from([
        ("blocked/a.txt".to_string(), "x".to_string()),
        ("blocked/b.txt".to_string(), "y".to_string()),
        ("ok.txt".to_string(), "fine".to_string()),
    ]);
    f.host.dispatch(HostMessage::SyncFiles { content: files });

    let messages = drain(&f.rx);
    let errors: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            ControllerMessage::Output { content, error: true, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("File Sync Error: blocked/a.txt"));
    assert!(errors[1].starts_with("File Sync Error: blocked/b.txt"));
    assert_eq!(messages.last(), Some(&ControllerMessage::FilesSynced));
    assert_eq!(
        fs::read_to_string(f.workspace.work_dir().join("ok.txt")).unwrap(),
        "fine"
    );
}

#[test]
fn test_run_with_closed_outbox_returns_to_ready() {
    let mut f = ready();
    drop(f.rx);
    f.host.dispatch(HostMessage::Run {
        content: "write partial".to_string(),
    });
    assert_eq!(f.host.state(), HostState::Ready);
}

#[test]
fn test_sync_files_then_scan() {
    let mut f = ready();
    let files = FileMap::from([
        ("pkg/a.txt".to_string(), "x".to_string()),
        ("../escape.txt".to_string(), "nope".to_string()),
    ]);
    f.host.dispatch(HostMessage::SyncFiles { content: files });
    let messages = drain(&f.rx);
    assert!(matches!(
        &messages[0],
        ControllerMessage::Output { content, error: true, .. } if content.contains("../escape.txt")
    ));
    assert_eq!(messages[1], ControllerMessage::FilesSynced);

    fs::create_dir_all(f.workspace.work_dir().join("__pycache__")).unwrap();
    fs::write(f.workspace.work_dir().join("__pycache__/x.pyc"), "c").unwrap();
    fs::write(f.workspace.work_dir().join(".hidden"), "h").unwrap();

    f.host.dispatch(HostMessage::ScanFiles);
    match &drain(&f.rx)[..] {
        [ControllerMessage::FilesUpdate { content }] => {
            assert_eq!(content.keys().collect::<Vec<_>>(), vec!["pkg/a.txt"]);
        }
        other => panic!("unexpected messages: {:?}", other),
    }
}

#[test]
fn test_channel_input_round_trip_on_worker_thread() {
    let root = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(root.path().join("work"), root.path().join("store"), 1_000_000);
    let probe = ScriptProbe::default();
    let channel = SharedChannel::default();
    let (tx, rx) = mpsc::channel();
    let mut host = Host::new(
        Box::new(probe.interpreter(workspace.work_dir())),
        workspace,
        Outbox::new(7, tx),
    );

    let worker_channel = channel.clone();
    let worker = thread::spawn(move || {
        host.dispatch(HostMessage::Init {
            buffer: Some(worker_channel),
            offline: false,
        });
        host.dispatch(HostMessage::Run {
            content: "write Name: \ninput name\nprint Hello, {name}!".into(),
        });
    });

    let mut seen = Vec::new();
    loop {
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let ControllerEvent::Host { generation, message } = event else {
            continue;
        };
        assert_eq!(generation, 7);
        if matches!(message, ControllerMessage::InputRequest { .. }) {
            channel.publish_str("Ada").unwrap();
        }
        let done = message.is_process_finished();
        seen.push(message);
        if done {
            break;
        }
    }
    worker.join().unwrap();

    let position = |needle: &ControllerMessage| seen.iter().position(|m| m == needle).unwrap();
    assert!(
        position(&ControllerMessage::stdout("Name: "))
            < position(&ControllerMessage::InputRequest { content: None })
    );
    assert!(seen.contains(&ControllerMessage::stdout("Hello, Ada!\n")));
    assert_eq!(
        seen.last(),
        Some(&ControllerMessage::system(PROCESS_FINISHED))
    );
}

#[test]
fn test_modal_host_reads_from_prompt() {
    struct Always(&'static str);
    impl ModalPrompt for Always {
        fn prompt(&mut self, _message: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    let root = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(root.path().join("work"), root.path().join("store"), 1_000_000);
    let probe = ScriptProbe::default();
    let (tx, rx) = mpsc::channel();
    let mut host = Host::new(
        Box::new(probe.interpreter(workspace.work_dir())),
        workspace,
        Outbox::new(2, tx),
    )
    .with_modal_prompt(Box::new(Always("Grace")));
    host.dispatch(HostMessage::Init {
        buffer: None,
        offline: false,
    });
    host.dispatch(HostMessage::Run {
        content: "input who Who? \nprint Hi {who}".into(),
    });

    let messages = drain(&rx);
    assert!(!messages
        .iter()
        .any(|m| matches!(m, ControllerMessage::InputRequest { .. })));
    assert!(messages.contains(&ControllerMessage::stdout("Who? ")));
    assert!(messages.contains(&ControllerMessage::stdout("Hi Grace\n")));
    assert_eq!(finished_count(&messages), 1);
}
