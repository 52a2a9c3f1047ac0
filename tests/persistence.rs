use particle_box::{config::SimulationConfig, prelude::*, Error, Result};
use rand::{rngs::StdRng, SeedableRng};
use std::{fs::File, io::BufReader, path::PathBuf};

/// Logs the writer thread events of a failing test, filtered by `RUST_LOG`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Returns a fresh path in the temporary directory, removed on drop.
struct TempPath(PathBuf);

impl TempPath {
    fn new(name: &str) -> Self {
        let unique = format!("particle_box-{}-{name}", std::process::id());
        let path = std::env::temp_dir().join(unique);
        let _ = std::fs::remove_file(&path);
        Self(path)
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn engine(dump: &TempPath, policy: QueuePolicy) -> Result<SimulationEngine<f32, 2>> {
    init_tracing();
    let bounds = WorldBounds::new([-100.0, -50.0], [100.0, 50.0])?;
    let store = ParticleStore::random(64, &bounds, 20.0, &mut StdRng::seed_from_u64(99))?;
    let options = EngineOptions::new(0.02)
        .with_damping(0.15)
        .with_threads(2)
        .with_dump_file(&dump.0)
        .with_queue_policy(policy);
    SimulationEngine::new(store, bounds, Box::new(Repulsion::new(1.0, 4.0)), options)
}

fn read_dump(dump: &TempPath) -> Result<(DumpHeader<2>, Vec<ParticleStore<f32, 2>>)> {
    let reader = DumpReader::<_, f32, 2>::new(BufReader::new(File::open(&dump.0)?), false)?;
    let header = *reader.header();
    let frames = reader.collect::<Result<Vec<_>>>()?;
    Ok((header, frames))
}

/// The dump holds exactly one frame per executed step, for small and large backlogs.
#[test]
fn dump_holds_one_frame_per_step() -> Result<()> {
    for steps in [0, 1, 37, 1200] {
        let dump = TempPath::new(&format!("frames-{steps}.dump"));
        let mut engine = engine(&dump, QueuePolicy::Unbounded)?;
        engine.start()?;

        assert_eq!(engine.run(steps)?, steps);
        let summary = engine.stop()?;
        let report = summary.persistence.expect("dump enabled");
        assert_eq!(report.snapshots_written, steps);
        assert_eq!(report.dropped, 0);

        let (header, frames) = read_dump(&dump)?;
        assert_eq!(header.particle_count, 64);
        assert_eq!(header.time_step, 0.02);
        assert_eq!(header.max, [100.0, 50.0]);
        assert_eq!(header.min, [-100.0, -50.0]);
        assert_eq!(frames.len() as u64, steps);
        assert_eq!(report.bytes_written, steps * 64 * 16);

        if let Some(last) = frames.last() {
            assert_eq!(last, engine.store());
        }
    }
    Ok(())
}

/// Frames are written in step order and each one matches the store after its step.
#[test]
fn frames_follow_the_steps() -> Result<()> {
    let dump = TempPath::new("order.dump");
    let mut engine = engine(&dump, QueuePolicy::Block { capacity: 1 })?;

    let mut expected = Vec::new();
    for _ in 0..20 {
        engine.step()?;
        expected.push(engine.store().clone());
    }
    engine.stop()?;

    let (_, frames) = read_dump(&dump)?;
    assert_eq!(frames, expected);
    Ok(())
}

/// Dropping snapshots never reorders the ones that are written.
#[test]
fn drop_oldest_keeps_order() -> Result<()> {
    let dump = TempPath::new("drop-oldest.dump");
    let mut engine = engine(&dump, QueuePolicy::DropOldest { capacity: 2 })?;

    let mut expected = Vec::new();
    for _ in 0..300 {
        engine.step()?;
        expected.push(engine.store().clone());
    }
    let report = engine.stop()?.persistence.expect("dump enabled");
    assert_eq!(report.snapshots_written + report.dropped, 300);

    let (_, frames) = read_dump(&dump)?;
    assert_eq!(frames.len() as u64, report.snapshots_written);
    assert_eq!(frames.last(), expected.last());

    let mut next = expected.iter();
    for frame in &frames {
        assert!(next.any(|e| e == frame), "frame out of order");
    }
    Ok(())
}

/// Masses are appended to every record when the kernel uses them.
#[test]
fn gravity_dumps_carry_masses() -> Result<()> {
    init_tracing();
    let dump = TempPath::new("masses.dump");
    let bounds = WorldBounds::centered([10.0, 10.0, 10.0])?;
    let store = ParticleStore::<f64, 3>::new(
        vec![[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        vec![[0.0; 3]; 2],
        Some(vec![2.0, 5.0]),
    )?;
    let options = EngineOptions::new(0.01).with_dump_file(&dump.0);
    let mut engine = SimulationEngine::new(store, bounds, Box::new(Gravity::new(1.0)), options)?;
    engine.run(3)?;
    let report = engine.stop()?.persistence.expect("dump enabled");

    assert_eq!(report.bytes_written, 3 * 2 * (6 * 8 + 8));
    let reader = DumpReader::<_, f64, 3>::new(BufReader::new(File::open(&dump.0)?), true)?;
    let frames = reader.collect::<Result<Vec<_>>>()?;
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2].masses(), Some(&[2.0, 5.0][..]));
    assert_eq!(&frames[2], engine.store());
    Ok(())
}

/// A dump that cannot be created stops the engine before any step.
#[test]
fn unwritable_dump_fails_on_start() -> Result<()> {
    let bounds = WorldBounds::centered([10.0, 10.0])?;
    let store = ParticleStore::<f32, 2>::new(vec![[0.0, 0.0]], vec![[1.0, 0.0]], None)?;
    let path = std::env::temp_dir().join("particle_box-missing-dir").join("run.dump");
    let options = EngineOptions::new(0.1).with_dump_file(path);
    let mut engine = SimulationEngine::new(store, bounds, Box::new(NoInteraction), options)?;

    assert!(matches!(engine.step(), Err(Error::Io(_))));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.steps(), 0);
    assert!(matches!(engine.step(), Err(Error::EngineStopped)));
    Ok(())
}

/// A configuration pointing at an initial state file runs its declared number of steps.
#[test]
fn configured_run_from_an_initial_state() -> Result<()> {
    init_tracing();
    let state = TempPath::new("initial.txt");
    let dump = TempPath::new("configured.dump");
    std::fs::write(
        &state.0,
        "3 15 0.01 200 100\n\
         0.0 0.0 1.0 0.0 10.0\n\
         5.0 5.0 0.0 -1.0 20.0\n\
         -5.0 2.0 0.5 0.5 30.0\n",
    )?;

    let config = SimulationConfig::from_toml_str(&format!(
        r#"
        [world]
        initial_state = {:?}
        initial_state_masses = true

        [kernel]
        type = "gravity"
        g = 1.0

        [decomposition]
        strategy = "sequential"

        [persistence]
        path = {:?}
        "#,
        state.0, dump.0
    ))?;

    let (mut engine, steps) = config.build::<f64, 2>()?;
    assert_eq!(steps, Some(15));
    assert_eq!(engine.bounds().max(), &[100.0, 50.0]);
    assert_eq!(engine.store().mass(2), 30.0);

    assert_eq!(engine.run(steps.unwrap_or_default())?, 15);
    engine.stop()?;

    let reader = DumpReader::<_, f64, 2>::new(BufReader::new(File::open(&dump.0)?), true)?;
    assert!((reader.header().time_step - 0.01).abs() < 1e-9);
    assert_eq!(reader.count(), 15);
    Ok(())
}
