use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use renderer::capture::FrameSink;
use renderer::error::{CaptureSinkError, FrameError, LoadError, LoopError, ShaderError};
use renderer::reload::{reload_channel, ReloadController, ReloadOutcome, ReloadReason};
use renderer::runtime::{FixedStepTimeSource, FrameClock, InputSnapshot, SystemTimeSource};
use renderer::state::{ActiveProgram, RunnerState};
use renderer::uniforms::{UniformName, UniformSlot, UniformValue};
use renderer::{
    compile, Backend, FragmentSource, FrameLoop, FrameOutcome, LoopConfig, LoopState, ShaderStage,
    Viewport,
};

const SOLID_RED: &str = "void mainImage(out vec4 c, in vec2 p){ c = vec4(1,0,0,1); }\n";
const FRAME_RAMP: &str =
    "void mainImage(out vec4 c, in vec2 p){ c = vec4(iFrame / 60.0, 0, 0, 1); }\n";
const TIME_AND_FRAME: &str =
    "void mainImage(out vec4 c, in vec2 p){ c = vec4(fract(iTime), iFrame / 60.0, 0, 1); }\n";
const BROKEN: &str = "void mainImage(out vec4 c, in vec2 p){ c = vec4(1,0,0,1) }\n";

struct TestProgram {
    generation: u64,
    active: Vec<UniformName>,
}

#[derive(Debug, Default)]
struct FrameRecord {
    viewport: Option<Viewport>,
    program: Option<u64>,
    uniforms: Vec<(UniformName, UniformValue)>,
    drawn: bool,
}

/// Backend that compiles through naga and records every call.
#[derive(Default)]
struct RecordingBackend {
    next_generation: u64,
    bound: Option<u64>,
    current: Option<FrameRecord>,
    frames: Vec<FrameRecord>,
    fail_next_begin: Option<FrameError>,
    compile_delay: Option<Duration>,
}

impl RecordingBackend {
    fn values(&self, name: UniformName) -> Vec<UniformValue> {
        self.frames
            .iter()
            .flat_map(|frame| frame.uniforms.iter())
            .filter(|(recorded, _)| *recorded == name)
            .map(|(_, value)| *value)
            .collect()
    }
}

impl Backend for RecordingBackend {
    type Program = TestProgram;

    fn compile_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<TestProgram, ShaderError> {
        if let Some(delay) = self.compile_delay {
            thread::sleep(delay);
        }
        let compiled = compile::compile_program(vertex_source, fragment_source)?;
        self.next_generation += 1;
        Ok(TestProgram {
            generation: self.next_generation,
            active: compiled.active_uniforms(),
        })
    }

    fn uniform_slot(&self, program: &TestProgram, name: UniformName) -> Option<UniformSlot> {
        program
            .active
            .contains(&name)
            .then(|| UniformSlot::new(program.generation, name.binding()))
    }

    fn begin_frame(&mut self, viewport: Viewport) -> Result<(), FrameError> {
        if let Some(err) = self.fail_next_begin.take() {
            return Err(err);
        }
        self.current = Some(FrameRecord {
            viewport: Some(viewport),
            ..FrameRecord::default()
        });
        Ok(())
    }

    fn bind_program(&mut self, program: &TestProgram) {
        self.bound = Some(program.generation);
        if let Some(frame) = self.current.as_mut() {
            frame.program = Some(program.generation);
        }
    }

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue) {
        assert_eq!(
            Some(slot.generation()),
            self.bound,
            "uniform slot used with a program it was not resolved against"
        );
        let name = UniformName::from_binding(slot.binding()).expect("unknown binding");
        self.current
            .as_mut()
            .expect("set_uniform outside a frame")
            .uniforms
            .push((name, value));
    }

    fn draw_quad(&mut self) {
        self.current.as_mut().expect("draw outside a frame").drawn = true;
    }

    fn read_pixels(&mut self, pixels: &mut Vec<u8>) -> Result<(), FrameError> {
        let frame = self.current.as_ref().expect("read outside a frame");
        let viewport = frame.viewport.expect("frame without viewport");
        pixels.clear();
        pixels.resize(viewport.rgb_frame_len(), self.frames.len() as u8);
        Ok(())
    }

    fn present(&mut self) {
        if let Some(frame) = self.current.take() {
            self.frames.push(frame);
        }
        self.bound = None;
    }
}

#[derive(Default)]
struct SinkLog {
    frames: Vec<Vec<u8>>,
    finished: u32,
    fail_writes: bool,
}

struct SharedSink(Rc<RefCell<SinkLog>>);

impl FrameSink for SharedSink {
    fn write_frame(&mut self, rgb: &[u8]) -> Result<(), CaptureSinkError> {
        let mut log = self.0.borrow_mut();
        if log.fail_writes {
            return Err(CaptureSinkError::Write {
                frame: log.frames.len() as u64,
                source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            });
        }
        log.frames.push(rgb.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CaptureSinkError> {
        self.0.borrow_mut().finished += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.0.borrow().frames.len() as u64
    }
}

fn write_shader(dir: &Path, source: &str) -> PathBuf {
    let path = dir.join("scene.frag");
    fs::write(&path, source).unwrap();
    path
}

fn input() -> InputSnapshot {
    InputSnapshot {
        viewport: Viewport::new(8, 4),
        pointer: [3.0, 1.0, 0.0, 0.0],
        key: [0.0; 4],
    }
}

fn config(sink: Option<SharedSink>, max_frames: Option<u64>) -> LoopConfig {
    LoopConfig {
        time_source: Box::new(FixedStepTimeSource::from_fps(60)),
        sink: sink.map(|sink| Box::new(sink) as Box<dyn FrameSink>),
        max_frames,
    }
}

fn start(
    path: &Path,
    config: LoopConfig,
) -> (FrameLoop<RecordingBackend>, renderer::reload::ReloadHandle) {
    let (handle, requests) = reload_channel();
    let fragment = FragmentSource::read(path).unwrap();
    let frame_loop = FrameLoop::start(
        RecordingBackend::default(),
        path.to_path_buf(),
        fragment,
        config,
        ReloadController::new(requests),
    )
    .unwrap_or_else(|err| panic!("failed to start: {err}"));
    (frame_loop, handle)
}

#[test]
fn shader_without_uniforms_gets_no_uniform_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), SOLID_RED);
    let (mut frame_loop, _handle) = start(&path, config(None, None));

    assert!(frame_loop.uniform_table().present_names().is_empty());
    for _ in 0..3 {
        assert!(matches!(
            frame_loop.iterate(&input()).unwrap(),
            FrameOutcome::Rendered { .. }
        ));
    }

    let frames = &frame_loop.backend().frames;
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|frame| frame.drawn && frame.uniforms.is_empty()));
    assert!(frames
        .iter()
        .all(|frame| frame.viewport == Some(Viewport::new(8, 4))));
}

#[test]
fn frame_uniform_counts_rendered_frames_from_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), FRAME_RAMP);
    let (mut frame_loop, _handle) = start(&path, config(None, None));

    assert_eq!(
        frame_loop.uniform_table().present_names(),
        vec![UniformName::Frame]
    );
    for expected in 0..5u64 {
        assert_eq!(
            frame_loop.iterate(&input()).unwrap(),
            FrameOutcome::Rendered { frame: expected }
        );
    }

    let values = frame_loop.backend().values(UniformName::Frame);
    let expected: Vec<_> = (0..5).map(|n| UniformValue::Float(n as f32)).collect();
    assert_eq!(values, expected);
    assert_eq!(frame_loop.clock().frame_index, 5);
}

#[test]
fn successful_reload_swaps_program_and_restarts_clock() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), FRAME_RAMP);
    let (mut frame_loop, handle) = start(&path, config(None, None));

    for _ in 0..3 {
        frame_loop.iterate(&input()).unwrap();
    }
    let first_generation = frame_loop.program().generation;

    fs::write(&path, TIME_AND_FRAME).unwrap();
    assert!(handle.request(ReloadReason::SourceChanged));
    assert!(handle.request(ReloadReason::SourceChanged));

    assert_eq!(
        frame_loop.iterate(&input()).unwrap(),
        FrameOutcome::Rendered { frame: 0 }
    );
    let generation = frame_loop.program().generation;
    assert_eq!(generation, first_generation + 1, "requests were not coalesced");
    assert_eq!(
        frame_loop.uniform_table().present_names(),
        vec![UniformName::Time, UniformName::Frame]
    );
    assert_eq!(frame_loop.clock().frame_index, 1);

    let last = frame_loop.backend().frames.last().unwrap();
    assert_eq!(last.program, Some(generation));
    assert!(last
        .uniforms
        .contains(&(UniformName::Time, UniformValue::Float(0.0))));
    assert!(last
        .uniforms
        .contains(&(UniformName::Frame, UniformValue::Float(0.0))));

    frame_loop.iterate(&input()).unwrap();
    assert_eq!(frame_loop.clock().frame_index, 2);
}

#[test]
fn startup_time_starts_at_the_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let source = "void mainImage(out vec4 c, in vec2 p){ c = vec4(fract(iTime), iTimeDelta, 0, 1); }\n";
    let path = write_shader(dir.path(), source);
    let (_handle, requests) = reload_channel();
    let time_source = Box::new(SystemTimeSource::new());
    let backend = RecordingBackend {
        compile_delay: Some(Duration::from_millis(250)),
        ..RecordingBackend::default()
    };
    let mut frame_loop = FrameLoop::start(
        backend,
        path.clone(),
        FragmentSource::read(&path).unwrap(),
        LoopConfig {
            time_source,
            sink: None,
            max_frames: None,
        },
        ReloadController::new(requests),
    )
    .unwrap();
    // The window needs a moment before its first redraw.
    thread::sleep(Duration::from_millis(100));

    frame_loop.iterate(&input()).unwrap();
    let backend = frame_loop.backend();
    for name in [UniformName::Time, UniformName::TimeDelta] {
        match backend.values(name).as_slice() {
            [UniformValue::Float(seconds)] => {
                assert!(*seconds < 0.1, "{name:?} at frame 0 was {seconds}")
            }
            other => panic!("unexpected {name:?} values {other:?}"),
        }
    }
}

#[test]
fn failed_reload_leaves_program_table_and_clock_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), FRAME_RAMP);
    let mut backend = RecordingBackend::default();
    let active = ActiveProgram::load(&mut backend, &path).unwrap();
    let mut clock = FrameClock::new(Box::new(FixedStepTimeSource::from_fps(30)));
    clock.tick();
    clock.tick();
    let mut runner = RunnerState::new(path.clone(), active, clock);
    let (handle, requests) = reload_channel();
    let mut controller = ReloadController::new(requests);

    let clock_before = runner.clock();
    let table_before = *runner.active().uniforms();
    let generation_before = runner.active().handle().generation;

    fs::write(&path, BROKEN).unwrap();
    handle.request(ReloadReason::Manual);
    match controller.poll(&mut backend, &mut runner) {
        Some(ReloadOutcome::Rejected(LoadError::Shader(err))) => {
            assert_eq!(err.stage(), Some(ShaderStage::Fragment));
        }
        other => panic!("expected rejected shader, got {other:?}"),
    }
    assert_eq!(runner.clock(), clock_before);
    assert_eq!(*runner.active().uniforms(), table_before);
    assert_eq!(runner.active().handle().generation, generation_before);

    fs::remove_file(&path).unwrap();
    handle.request(ReloadReason::SourceChanged);
    assert!(matches!(
        controller.poll(&mut backend, &mut runner),
        Some(ReloadOutcome::Rejected(LoadError::Source(_)))
    ));
    assert_eq!(runner.clock(), clock_before);
    assert!(controller.poll(&mut backend, &mut runner).is_none());
}

#[test]
fn failed_reload_keeps_rendering_previous_program() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), FRAME_RAMP);
    let (mut frame_loop, handle) = start(&path, config(None, None));

    frame_loop.iterate(&input()).unwrap();
    frame_loop.iterate(&input()).unwrap();
    let generation = frame_loop.program().generation;

    fs::write(&path, BROKEN).unwrap();
    handle.request(ReloadReason::SourceChanged);
    assert_eq!(
        frame_loop.iterate(&input()).unwrap(),
        FrameOutcome::Rendered { frame: 2 }
    );
    assert_eq!(frame_loop.program().generation, generation);
    assert_eq!(frame_loop.state(), LoopState::Running);
}

#[test]
fn capture_receives_exactly_k_frames_in_render_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), FRAME_RAMP);
    let log = Rc::new(RefCell::new(SinkLog::default()));
    let (mut frame_loop, _handle) = start(
        &path,
        config(Some(SharedSink(Rc::clone(&log))), Some(4)),
    );
    assert!(frame_loop.is_capturing());

    let mut rendered = Vec::new();
    loop {
        match frame_loop.iterate(&input()).unwrap() {
            FrameOutcome::Rendered { frame } => rendered.push(frame),
            FrameOutcome::Skipped => {}
            FrameOutcome::Closed => break,
        }
    }
    assert_eq!(rendered, vec![0, 1, 2, 3]);
    assert_eq!(frame_loop.state(), LoopState::Closing);

    frame_loop.shutdown().unwrap();
    frame_loop.shutdown().unwrap();

    let log = log.borrow();
    assert_eq!(log.finished, 1);
    assert_eq!(log.frames.len(), 4);
    for (index, frame) in log.frames.iter().enumerate() {
        assert_eq!(frame.len(), Viewport::new(8, 4).rgb_frame_len());
        assert!(frame.iter().all(|byte| *byte == index as u8));
    }
}

#[test]
fn sink_failure_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), SOLID_RED);
    let log = Rc::new(RefCell::new(SinkLog {
        fail_writes: true,
        ..SinkLog::default()
    }));
    let (mut frame_loop, _handle) = start(&path, config(Some(SharedSink(Rc::clone(&log))), None));

    let err = frame_loop.iterate(&input()).unwrap_err();
    assert!(matches!(err, LoopError::Capture(CaptureSinkError::Write { frame: 0, .. })));
    assert_eq!(frame_loop.state(), LoopState::Closing);
    assert_eq!(frame_loop.iterate(&input()).unwrap(), FrameOutcome::Closed);
}

#[test]
fn skipped_frames_do_not_advance_the_clock() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), FRAME_RAMP);
    let (mut frame_loop, _handle) = start(&path, config(None, None));

    frame_loop.iterate(&input()).unwrap();
    frame_loop.backend_mut().fail_next_begin = Some(FrameError::Reconfigure);
    assert_eq!(frame_loop.iterate(&input()).unwrap(), FrameOutcome::Skipped);

    let mut minimised = input();
    minimised.viewport = Viewport::new(0, 0);
    assert_eq!(frame_loop.iterate(&minimised).unwrap(), FrameOutcome::Skipped);

    assert_eq!(frame_loop.clock().frame_index, 1);
    assert_eq!(
        frame_loop.iterate(&input()).unwrap(),
        FrameOutcome::Rendered { frame: 1 }
    );
}

#[test]
fn out_of_memory_ends_the_loop_with_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), SOLID_RED);
    let (mut frame_loop, _handle) = start(&path, config(None, None));

    frame_loop.backend_mut().fail_next_begin = Some(FrameError::OutOfMemory);
    assert!(matches!(
        frame_loop.iterate(&input()),
        Err(LoopError::Frame(FrameError::OutOfMemory))
    ));
    assert_eq!(frame_loop.state(), LoopState::Closing);
}

#[test]
fn pointer_and_resolution_reach_the_shader() {
    let dir = tempfile::tempdir().unwrap();
    let source = "void mainImage(out vec4 c, in vec2 p){ c = vec4(iMouse.xy / iResolution.xy, 0, 1); }\n";
    let path = write_shader(dir.path(), source);
    let (mut frame_loop, _handle) = start(&path, config(None, None));

    frame_loop.iterate(&input()).unwrap();
    let backend = frame_loop.backend();
    assert_eq!(
        backend.values(UniformName::Resolution),
        vec![UniformValue::Vec3([8.0, 4.0, 1.0])]
    );
    assert_eq!(
        backend.values(UniformName::Pointer),
        vec![UniformValue::Vec4([3.0, 1.0, 0.0, 0.0])]
    );
}

#[test]
fn close_request_stops_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), SOLID_RED);
    let (mut frame_loop, _handle) = start(&path, config(None, None));

    frame_loop.iterate(&input()).unwrap();
    frame_loop.request_close();
    assert_eq!(frame_loop.iterate(&input()).unwrap(), FrameOutcome::Closed);
    assert_eq!(frame_loop.frames_rendered(), 1);
    frame_loop.shutdown().unwrap();
}

#[test]
fn broken_shader_at_startup_is_reported_with_its_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_shader(dir.path(), BROKEN);
    let (_handle, requests) = reload_channel();
    let result = FrameLoop::start(
        RecordingBackend::default(),
        path.clone(),
        FragmentSource::read(&path).unwrap(),
        config(None, None),
        ReloadController::new(requests),
    );
    match result {
        Err(ShaderError::Compile { stage, log }) => {
            assert_eq!(stage, ShaderStage::Fragment);
            assert!(!log.is_empty());
        }
        Err(other) => panic!("expected compile error, got {other}"),
        Ok(_) => panic!("broken shader started"),
    }
}
