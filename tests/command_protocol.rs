//! Command dispatch and reply protocol coverage.

mod helpers;

use std::sync::Arc;

use helpers::{drive_until, run_block, MockBackend, MockProbe, RecordingSink};
use plughost::{
    GuiMode, HostCommand, HostConfig, HostState, ParamValue, PluginHost, Reply, ReplySink,
    WorkerEngine,
};

fn make_host(
    engine: &WorkerEngine,
    num_params: usize,
    probe: Arc<MockProbe>,
) -> (PluginHost, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let host = PluginHost::new(
        HostConfig {
            block_size: 64,
            gui_mode: GuiMode::Inline,
            ..Default::default()
        },
        engine.sender(),
        Arc::clone(&sink) as Arc<dyn ReplySink>,
    )
    .with_backend_factory(Arc::new(move |_path: &std::path::Path| {
        Ok(Box::new(
            MockBackend::new(num_params, 2).with_probe(Arc::clone(&probe)),
        ))
    }));
    (host, sink)
}

fn open_ready(host: &mut PluginHost, sink: &RecordingSink) {
    host.open("/plugins/fx.so", false);
    drive_until(host, |h| h.state() == HostState::Ready);
    sink.take();
}

#[test]
fn get_replies_with_single_value() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 4, probe);
    open_ready(&mut host, &sink);

    host.dispatch(HostCommand::Set {
        pairs: vec![(1, ParamValue::Float(0.6))],
    });
    drive_until(&mut host, |_| sink.contains("/param"));
    sink.take();

    host.dispatch(HostCommand::Get { index: 1 });
    drive_until(&mut host, |_| sink.contains("/set"));
    assert!(sink.take().contains(&Reply::Set { value: 0.6 }));
}

#[test]
fn getn_replies_with_value_run() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 4, probe);
    open_ready(&mut host, &sink);

    host.dispatch(HostCommand::Set {
        pairs: vec![
            (0, ParamValue::Float(0.1)),
            (1, ParamValue::Float(0.2)),
            (2, ParamValue::Float(0.3)),
        ],
    });
    drive_until(&mut host, |_| sink.count("/param") >= 3);
    sink.take();

    host.dispatch(HostCommand::GetN { index: 0, count: 3 });
    drive_until(&mut host, |_| sink.contains("/setn"));
    assert!(sink.take().contains(&Reply::SetN {
        values: vec![0.1, 0.2, 0.3]
    }));

    // Count is clamped at the declared parameter count.
    host.dispatch(HostCommand::GetN { index: 2, count: 99 });
    drive_until(&mut host, |_| sink.contains("/setn"));
    let replies = sink.take();
    assert!(replies
        .iter()
        .any(|r| matches!(r, Reply::SetN { values } if values.len() == 2)));
}

#[test]
fn param_query_emits_values_and_displays() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 3, probe);
    open_ready(&mut host, &sink);

    host.dispatch(HostCommand::Set {
        pairs: vec![(1, ParamValue::Float(0.5))],
    });
    drive_until(&mut host, |_| sink.contains("/param"));
    sink.take();

    host.dispatch(HostCommand::ParamQuery { onset: 0, count: 3 });
    drive_until(&mut host, |_| sink.count("/param") >= 3);
    let params: Vec<(i32, f32, String)> = sink
        .take()
        .into_iter()
        .filter_map(|r| match r {
            Reply::Param {
                index,
                value,
                display,
            } => Some((index, value, display)),
            _ => None,
        })
        .collect();
    assert_eq!(params.len(), 3);
    assert_eq!(params[1], (1, 0.5, "0.50".to_string()));
}

#[test]
fn setn_spans_fan_out_to_consecutive_indices() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 6, Arc::clone(&probe));
    open_ready(&mut host, &sink);

    host.dispatch(HostCommand::SetN {
        spans: vec![(
            2,
            vec![
                ParamValue::Float(0.2),
                ParamValue::Float(0.4),
                ParamValue::Float(0.8),
            ],
        )],
    });
    drive_until(&mut host, |_| sink.count("/param") >= 3);
    let calls = probe.set_calls.lock().clone();
    assert_eq!(calls, vec![(2, 0.2), (3, 0.4), (4, 0.8)]);
}

#[test]
fn set_by_string_goes_through_backend_parser() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 2, Arc::clone(&probe));
    open_ready(&mut host, &sink);

    host.dispatch(HostCommand::Set {
        pairs: vec![(0, ParamValue::from("0.75"))],
    });
    drive_until(&mut host, |_| sink.contains("/param"));
    assert!(probe.set_calls.lock().contains(&(0, 0.75)));

    // An unparseable string leaves the parameter untouched but still
    // reports the current state.
    sink.take();
    host.dispatch(HostCommand::Set {
        pairs: vec![(0, ParamValue::from("loud"))],
    });
    drive_until(&mut host, |_| sink.contains("/param"));
    assert!(sink
        .take()
        .iter()
        .any(|r| matches!(r, Reply::Param { index: 0, value, .. } if *value == 0.75)));
}

#[test]
fn map_spans_channels_and_unmap_all_clears() {
    let engine = WorkerEngine::spawn();
    let probe = Arc::new(MockProbe::default());
    let (mut host, sink) = make_host(&engine, 4, Arc::clone(&probe));
    open_ready(&mut host, &sink);

    // Map parameters 1..3 to buses 5..7 in one command.
    host.dispatch(HostCommand::Map {
        index: 1,
        bus: 5,
        channels: 3,
    });
    let mut buses = vec![0.0f32; 8];
    buses[5] = 0.1;
    buses[6] = 0.2;
    buses[7] = 0.3;
    run_block(&mut host, false, &[0.0; 8], &[], &buses);
    assert_eq!(
        probe.set_calls.lock().clone(),
        vec![(1, 0.1), (2, 0.2), (3, 0.3)]
    );

    // Empty unmap means "all"; further bus changes are ignored.
    host.dispatch(HostCommand::Unmap { indices: vec![] });
    probe.set_calls.lock().clear();
    buses[6] = 0.9;
    run_block(&mut host, false, &[0.0; 8], &[], &buses);
    assert!(probe.set_calls.lock().is_empty());
}

#[test]
fn command_tags_round_trip_as_wire_messages() {
    // The control surface is serializable end to end, so transports can
    // carry commands verbatim.
    let commands = vec![
        HostCommand::Open {
            path: "/p/synth.vst3".into(),
            editor: true,
        },
        HostCommand::Set {
            pairs: vec![(0, ParamValue::Float(0.5)), (1, ParamValue::from("12 dB"))],
        },
        HostCommand::Map {
            index: 0,
            bus: 3,
            channels: 2,
        },
        HostCommand::ProgramDataSet {
            total: 100,
            onset: 50,
            bytes: vec![1, 2, 3],
        },
        HostCommand::TransportSet { position: 4.5 },
        HostCommand::Close,
    ];
    for command in commands {
        let json = serde_json::to_string(&command).unwrap();
        let decoded: HostCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, command);
        assert!(!command.tag().is_empty());
    }
}

#[test]
fn double_precision_path_processes() {
    use plughost::PluginBackend;
    let mut backend = MockBackend::new(2, 1);
    let inputs = vec![vec![1.0f64; 16], vec![0.5f64; 16]];
    let mut outputs = vec![vec![0.0f64; 16], vec![0.0f64; 16]];
    backend.process_double(&inputs, &mut outputs, 16);
    assert!((outputs[0][0] - 0.5).abs() < 1e-12);
    assert!((outputs[1][15] - 0.25).abs() < 1e-12);
}
