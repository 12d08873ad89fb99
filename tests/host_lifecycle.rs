//! End-to-end lifecycle scenarios against a scripted backend.

mod helpers;

use std::sync::Arc;

use helpers::{drive_until, run_block, MockBackend, MockProbe, MockWindowFactory, RecordingSink};
use plughost::{
    GuiMode, HostCommand, HostConfig, HostState, ParamValue, PluginHost, Reply, ReplySink,
    WorkerEngine,
};

fn config() -> HostConfig {
    HostConfig {
        block_size: 64,
        gui_mode: GuiMode::Inline,
        ..Default::default()
    }
}

fn make_host(
    engine: &WorkerEngine,
    num_params: usize,
    num_programs: usize,
    probe: Arc<MockProbe>,
) -> (PluginHost, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let host = PluginHost::new(
        config(),
        engine.sender(),
        Arc::clone(&sink) as Arc<dyn ReplySink>,
    )
    .with_backend_factory(Arc::new(move |_path: &std::path::Path| {
        Ok(Box::new(
            MockBackend::new(num_params, num_programs).with_probe(Arc::clone(&probe)),
        ))
    }));
    (host, sink)
}

#[test]
fn open_set_close_scenario() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 8, 2, Arc::clone(&probe));

    // open("synth1", withEditor=0) -> /open {1, 0}
    host.dispatch(HostCommand::Open {
        path: "/plugins/synth1.so".into(),
        editor: false,
    });
    drive_until(&mut host, |h| h.state() == HostState::Ready);
    assert!(sink.take().contains(&Reply::Open {
        ok: true,
        has_editor: false
    }));

    // setParam(3, 0.25); next block observes the value at the backend.
    host.dispatch(HostCommand::Set {
        pairs: vec![(3, ParamValue::Float(0.25))],
    });
    drive_until(&mut host, |_| sink.contains("/param"));
    assert!(probe.set_calls.lock().contains(&(3, 0.25)));

    // close; a subsequent open succeeds again.
    host.dispatch(HostCommand::Close);
    assert!(!host.is_loaded());
    drive_until(&mut host, |h| h.state() == HostState::Empty);

    sink.take();
    host.dispatch(HostCommand::Open {
        path: "/plugins/synth1.so".into(),
        editor: false,
    });
    drive_until(&mut host, |h| h.state() == HostState::Ready);
    assert!(sink.contains("/open"));
}

#[test]
fn bus_mapping_scenario() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, _sink) = make_host(&engine, 4, 1, Arc::clone(&probe));
    host.open("/plugins/fx.so", false);
    drive_until(&mut host, |h| h.state() == HostState::Ready);
    probe.set_calls.lock().clear();

    host.dispatch(HostCommand::Map {
        index: 0,
        bus: 7,
        channels: 1,
    });

    let mut buses = vec![0.0f32; 8];
    buses[7] = 0.5;
    run_block(&mut host, false, &[0.0; 16], &[], &buses);
    assert_eq!(probe.set_calls.lock().as_slice(), &[(0, 0.5)]);

    // Same bus value again: no new send.
    run_block(&mut host, false, &[0.0; 16], &[], &buses);
    assert_eq!(probe.set_calls.lock().len(), 1);

    // New value: exactly one more send.
    buses[7] = 0.9;
    run_block(&mut host, false, &[0.0; 16], &[], &buses);
    assert_eq!(probe.set_calls.lock().as_slice(), &[(0, 0.5), (0, 0.9)]);

    // Unmapped: bus changes stop reaching the backend.
    host.dispatch(HostCommand::Unmap { indices: vec![0] });
    buses[7] = 0.1;
    run_block(&mut host, false, &[0.0; 16], &[], &buses);
    assert_eq!(probe.set_calls.lock().len(), 2);
}

#[test]
fn bypass_transition_scenario() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, _sink) = make_host(&engine, 2, 1, Arc::clone(&probe));
    host.open("/plugins/fx.so", false);
    drive_until(&mut host, |h| h.state() == HostState::Ready);
    let baseline_suspends = *probe.suspend_count.lock();

    // Two bypassed blocks: input appears unchanged on the output.
    let input = [1.0f32, 2.0, 3.0, 4.0];
    for _ in 0..2 {
        let out = run_block(&mut host, true, &input, &[], &[]);
        assert_eq!(out[0], vec![1.0, 2.0, 3.0, 4.0]);
    }
    assert_eq!(host.state(), HostState::Bypassed);

    // Bypass off: processing resumes (mock halves the signal), and the
    // transition did not trigger a reset.
    let out = run_block(&mut host, false, &input, &[], &[]);
    assert_eq!(out[0], vec![0.5, 1.0, 1.5, 2.0]);
    assert_eq!(host.state(), HostState::Ready);
    assert_eq!(*probe.suspend_count.lock(), baseline_suspends);
}

#[test]
fn explicit_set_overrides_bus_mapping() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 4, 1, Arc::clone(&probe));
    host.open("/plugins/fx.so", false);
    drive_until(&mut host, |h| h.state() == HostState::Ready);

    host.map_param(2, 3);
    let mut buses = vec![0.0f32; 4];
    buses[3] = 0.4;
    run_block(&mut host, false, &[0.0; 8], &[], &buses);

    // Explicit set drops the mapping once applied.
    host.set_param(2, ParamValue::Float(0.8));
    drive_until(&mut host, |_| sink.contains("/param"));

    probe.set_calls.lock().clear();
    buses[3] = 0.6;
    run_block(&mut host, false, &[0.0; 8], &[], &buses);
    assert!(probe.set_calls.lock().is_empty());
}

#[test]
fn reset_async_runs_on_worker() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, _sink) = make_host(&engine, 2, 1, Arc::clone(&probe));
    host.open("/plugins/fx.so", false);
    drive_until(&mut host, |h| h.state() == HostState::Ready);
    let baseline = *probe.suspend_count.lock();

    host.dispatch(HostCommand::Reset { is_async: true });
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while *probe.suspend_count.lock() == baseline {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(*probe.resume_count.lock(), *probe.suspend_count.lock());

    // Synchronous reset happens inline.
    host.dispatch(HostCommand::Reset { is_async: false });
    assert_eq!(*probe.suspend_count.lock(), baseline + 2);
}

#[test]
fn midi_and_transport_pass_through() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 2, 1, Arc::clone(&probe));
    host.open("/plugins/synth.so", false);
    drive_until(&mut host, |h| h.state() == HostState::Ready);

    host.dispatch(HostCommand::MidiMsg {
        status: 0x90,
        data1: 60,
        data2: 100,
    });
    assert_eq!(probe.midi_in.lock().len(), 1);
    assert_eq!(probe.midi_in.lock()[0].data, [0x90, 60, 100]);

    host.dispatch(HostCommand::Tempo { bpm: 98.0 });
    host.dispatch(HostCommand::TimeSig {
        numerator: 7,
        denominator: 8,
    });
    host.dispatch(HostCommand::TransportSet { position: 16.0 });
    host.dispatch(HostCommand::TransportGet);
    assert!(sink
        .snapshot()
        .iter()
        .any(|r| matches!(r, Reply::Transport { position } if *position == 16.0)));
}

#[test]
fn can_do_and_vendor_queries_reply() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 2, 1, probe);
    host.open("/plugins/fx.so", false);
    drive_until(&mut host, |h| h.state() == HostState::Ready);

    host.dispatch(HostCommand::CanDo {
        what: "receiveMidi".into(),
    });
    host.dispatch(HostCommand::CanDo {
        what: "teleport".into(),
    });
    let replies = sink.take();
    let can_dos: Vec<i32> = replies
        .iter()
        .filter_map(|r| match r {
            Reply::CanDo { result } => Some(*result),
            _ => None,
        })
        .collect();
    assert_eq!(can_dos, vec![1, 0]);

    host.dispatch(HostCommand::VendorMethod {
        index: 42,
        value: 0,
        data: vec![],
        opt: 0.0,
    });
    assert!(sink
        .take()
        .iter()
        .any(|r| matches!(r, Reply::VendorMethod { result: 42 })));
}

#[test]
fn editor_open_reports_and_shows() {
    let engine = WorkerEngine::spawn();
    let sink = Arc::new(RecordingSink::default());
    let mut host = PluginHost::new(
        config(),
        engine.sender(),
        Arc::clone(&sink) as Arc<dyn ReplySink>,
    )
    .with_backend_factory(Arc::new(|_path: &std::path::Path| {
        Ok(Box::new(MockBackend::new(2, 1).with_editor()))
    }))
    .with_window_factory(Arc::new(MockWindowFactory));

    host.open("/plugins/synth.so", true);
    drive_until(&mut host, |h| h.state() == HostState::Ready);
    assert!(host.has_editor_window());
    assert!(sink.take().contains(&Reply::Open {
        ok: true,
        has_editor: true
    }));

    // vis on/off round-trips through the worker without panicking.
    host.dispatch(HostCommand::Vis { show: true });
    host.dispatch(HostCommand::Vis { show: false });
    std::thread::sleep(std::time::Duration::from_millis(20));

    host.close();
    drive_until(&mut host, |h| h.state() == HostState::Empty);
}

#[test]
fn program_query_and_set() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 2, 3, probe);
    host.open("/plugins/synth.so", false);
    drive_until(&mut host, |h| h.state() == HostState::Ready);
    sink.take();

    host.dispatch(HostCommand::ProgramSet { index: 2 });
    drive_until(&mut host, |_| sink.contains("/program_name"));
    let replies = sink.take();
    assert!(replies.contains(&Reply::ProgramIndex { index: 2 }));
    assert!(replies.contains(&Reply::ProgramName {
        index: 2,
        name: "Program 2".to_string()
    }));

    host.dispatch(HostCommand::ProgramQuery { onset: 0, count: 3 });
    drive_until(&mut host, |_| sink.count("/program_name") >= 3);
    let names: Vec<(i32, String)> = sink
        .take()
        .into_iter()
        .filter_map(|r| match r {
            Reply::ProgramName { index, name } => Some((index, name)),
            _ => None,
        })
        .collect();
    assert_eq!(names[0], (0, "Program 0".to_string()));
    assert_eq!(names[2], (2, "Program 2".to_string()));

    // Out-of-range program set is refused.
    host.dispatch(HostCommand::ProgramSet { index: 9 });
    std::thread::sleep(std::time::Duration::from_millis(20));
    run_block(&mut host, false, &[0.0; 8], &[], &[]);
    assert!(!sink.contains("/program_index"));
}
