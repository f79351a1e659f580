//! The simulation controller: a single-threaded state machine that owns the active
//! model and the raster, and turns commands into generations and status events.

use crate::export::FrameSink;
use crate::model::DiffusionModel;
use crate::raster::{FrontView, RasterBuffer};
use crate::stats::CensusRecorder;
use crate::transport::{Command, Event};
use diffusion_common::ControllerConfig;
use log::{debug, error, info, trace, warn};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run started since launch or the last reset.
    Idle,
    Running,
    /// A run that is on hold; still counts as running.
    Paused,
    Stopped,
    /// The model reported it is no longer active.
    Completed,
}

impl Phase {
    fn in_run(self) -> bool {
        matches!(self, Phase::Running | Phase::Paused)
    }
}

pub struct Controller {
    raster: RasterBuffer,
    model: Box<dyn DiffusionModel>,
    config: ControllerConfig,
    phase: Phase,
    generation: u64,
    exporter: Option<Box<dyn FrameSink>>,
    recorder: Option<CensusRecorder>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl Controller {
    pub fn new(raster: RasterBuffer, model: Box<dyn DiffusionModel>, config: ControllerConfig) -> Self {
        Controller {
            raster,
            model,
            config,
            phase: Phase::Idle,
            generation: 0,
            exporter: None,
            recorder: None,
            shutdown: None,
        }
    }

    pub fn with_exporter(mut self, exporter: Box<dyn FrameSink>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_recorder(mut self, recorder: CensusRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Flag raised once `run` has returned and the raster is no longer touched.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Binds the model to the raster and shows its initial distribution.
    pub fn configure(&mut self) {
        self.model.configure(&self.raster);
        self.model.reset(&mut self.raster);
        self.raster.swap();
        info!(
            "Configured {} on a {}x{} grid",
            self.model.name(),
            self.raster.width(),
            self.raster.height()
        );
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn model(&self) -> &dyn DiffusionModel {
        self.model.as_ref()
    }

    pub fn front_view(&self) -> FrontView {
        self.raster.front_view()
    }

    /// Applies one command. The flow breaks when the command ends the controller loop.
    pub fn handle_command(&mut self, command: Command) -> (Option<Event>, ControlFlow<()>) {
        debug!("Command '{}' in phase {:?}", command, self.phase);
        let event = match command {
            Command::Run => {
                if self.phase.in_run() {
                    Some(Event::Running)
                } else {
                    self.phase = Phase::Running;
                    self.open_sinks();
                    self.reset_model();
                    Some(Event::Started)
                }
            }
            Command::Step => {
                self.step_once();
                Some(Event::Stepped)
            }
            Command::Pause => match self.phase {
                Phase::Paused => Some(Event::AlreadyPaused),
                Phase::Running => {
                    self.phase = Phase::Paused;
                    Some(Event::Paused)
                }
                _ => Some(Event::NotRunning),
            },
            Command::Resume => {
                if self.phase == Phase::Paused {
                    self.phase = Phase::Running;
                    Some(Event::Resumed)
                } else {
                    Some(Event::NotPaused)
                }
            }
            Command::Reset => {
                // Discards the sinks' output for an unfinished run
                self.phase = Phase::Idle;
                self.open_sinks();
                self.reset_model();
                Some(Event::Reset)
            }
            Command::Stop => {
                self.end_run();
                self.phase = Phase::Stopped;
                Some(Event::Stopped)
            }
            Command::Status => Some(Event::Status(self.generation)),
            Command::Exit => {
                let event = match self.phase {
                    Phase::Running | Phase::Paused => {
                        self.end_run();
                        Some(Event::Terminated)
                    }
                    // Complete was already reported
                    Phase::Completed => None,
                    Phase::Idle | Phase::Stopped => Some(Event::Exited),
                };
                return (event, ControlFlow::Break(()));
            }
            Command::Model(text) => self.model.send_event(&text).map(Event::Model),
        };
        (event, ControlFlow::Continue(()))
    }

    /// Autonomous progress while no command is pending: one generation when running.
    pub fn tick(&mut self) -> Option<Event> {
        if self.phase != Phase::Running {
            return None;
        }
        if self.step_once() {
            return None;
        }
        self.phase = Phase::Completed;
        self.end_run();
        info!("{} completed after {} generations", self.model.name(), self.generation);
        Some(Event::Complete)
    }

    /// Drives the controller until `exit` or until the command channel disconnects.
    pub fn run(&mut self, commands: &Receiver<Command>, events: &Sender<Event>) {
        info!("Controller started ({})", self.model.name());
        loop {
            let command = if self.phase == Phase::Running {
                match commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => {
                        warn!("Command channel closed; exiting");
                        Some(Command::Exit)
                    }
                }
            } else {
                // Idle, paused or finished: block briefly instead of spinning
                match commands.recv_timeout(self.config.idle_wait()) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!("Command channel closed; exiting");
                        Some(Command::Exit)
                    }
                }
            };

            match command {
                Some(command) => {
                    let (event, flow) = self.handle_command(command);
                    if let Some(event) = event {
                        emit(events, event);
                    }
                    if flow.is_break() {
                        break;
                    }
                }
                None => {
                    if let Some(event) = self.tick() {
                        emit(events, event);
                    }
                    if self.phase == Phase::Running && !self.config.step_delay().is_zero() {
                        thread::sleep(self.config.step_delay());
                    }
                }
            }
        }

        info!("Controller stopped at generation {}", self.generation);
        if let Some(flag) = &self.shutdown {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn reset_model(&mut self) {
        self.model.reset(&mut self.raster);
        self.generation = 0;
        self.publish_frame();
        self.raster.swap();
    }

    fn open_sinks(&mut self) {
        let name = self.model.name();
        if let Some(exporter) = self.exporter.as_mut() {
            exporter.begin(name);
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.begin(name);
        }
    }

    /// Closes the current run's exporter and recorder output.
    fn end_run(&mut self) {
        if let Some(exporter) = self.exporter.as_mut() {
            if let Err(e) = exporter.finish() {
                error!("Error finishing export for {}: {:#}", self.model.name(), e);
            }
        }
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.save() {
                error!("Error saving census for {}: {:#}", self.model.name(), e);
            }
            recorder.begin(self.model.name());
        }
    }

    /// One generation: step, publish the painted frame, then swap it to the front.
    fn step_once(&mut self) -> bool {
        let start = Instant::now();
        let active = self.model.step(&mut self.raster);
        self.generation += 1;
        self.publish_frame();
        self.raster.swap();
        trace!(
            "Generation {} took {:.3} ms (active: {})",
            self.generation,
            start.elapsed().as_secs_f64() * 1000.0,
            active
        );
        active
    }

    /// Hands the freshly painted back grid to the exporter and records the census.
    /// Frames outside a run are not published.
    fn publish_frame(&mut self) {
        if !self.phase.in_run() {
            return;
        }
        if let Some(exporter) = self.exporter.as_mut() {
            if let Err(e) = exporter.frame(self.generation, self.raster.back_pixels()) {
                error!("Error exporting frame {}: {:#}", self.generation, e);
            }
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(self.generation, &self.model.census());
        }
    }
}

fn emit(events: &Sender<Event>, event: Event) {
    if event.is_rejection() {
        info!("Command rejected: {}", event);
    } else {
        debug!("Event '{}'", event);
    }
    if let Err(e) = events.send(event) {
        warn!("No observer for status event '{}'", e.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Onset, SirModel, SirParams, SisModel, SisParams};
    use crate::transport;
    use anyhow::Result;
    use image::RgbaImage;
    use std::sync::Mutex;
    use std::time::Duration;

    fn sir_controller(params: SirParams) -> Controller {
        let raster = RasterBuffer::new(9, 9).unwrap();
        let model = Box::new(SirModel::new(params).unwrap());
        let mut controller = Controller::new(raster, model, ControllerConfig::default());
        controller.configure();
        controller
    }

    fn events(controller: &mut Controller, commands: &[&str]) -> Vec<Option<String>> {
        commands
            .iter()
            .map(|c| controller.handle_command(c.parse().unwrap()).0.map(|e| e.to_string()))
            .collect()
    }

    fn say(words: &[&str]) -> Vec<Option<String>> {
        words.iter().map(|w| Some(w.to_string())).collect()
    }

    /// Records every sink call as text.
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl FrameSink for Journal {
        fn begin(&mut self, model_name: &str) {
            self.0.lock().unwrap().push(format!("begin {}", model_name));
        }

        fn frame(&mut self, generation: u64, _frame: &RgbaImage) -> Result<()> {
            self.0.lock().unwrap().push(format!("frame {}", generation));
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("finish".to_string());
            Ok(())
        }
    }

    #[test]
    fn pause_before_run_is_rejected() {
        let mut controller = sir_controller(SirParams::default());
        assert_eq!(events(&mut controller, &["pause"]), say(&["Not Running"]));
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[test]
    fn run_pause_pause() {
        let mut controller = sir_controller(SirParams::default());
        assert_eq!(
            events(&mut controller, &["run", "pause", "pause"]),
            say(&["Started", "Paused", "Already Paused"])
        );
        assert_eq!(controller.phase(), Phase::Paused);
    }

    #[test]
    fn rejections_leave_the_phase_alone() {
        let mut controller = sir_controller(SirParams::default());
        assert_eq!(events(&mut controller, &["resume", "run", "run"]), say(&["Not Paused", "Started", "Running"]));
        assert_eq!(controller.phase(), Phase::Running);
        assert_eq!(events(&mut controller, &["pause", "run", "resume"]), say(&["Paused", "Running", "Resumed"]));
        assert_eq!(controller.phase(), Phase::Running);
    }

    #[test]
    fn stop_clears_pause() {
        let mut controller = sir_controller(SirParams::default());
        assert_eq!(
            events(&mut controller, &["run", "pause", "stop", "resume"]),
            say(&["Started", "Paused", "Stopped", "Not Paused"])
        );
        assert_eq!(controller.phase(), Phase::Stopped);
    }

    #[test]
    fn status_reports_generations() {
        let mut controller = sir_controller(SirParams::default());
        assert_eq!(events(&mut controller, &["status", "step", "step", "status"]), say(&["Status: 0", "Stepped", "Stepped", "Status: 2"]));
    }

    #[test]
    fn reset_restores_the_initial_distribution() {
        let mut controller = sir_controller(SirParams { transmission: 1.0, seed: 1 });
        let initial = controller.model().census();

        let _ = controller.handle_command(Command::Run);
        for _ in 0..3 {
            controller.tick();
        }
        assert_ne!(controller.model().census(), initial);

        let (event, flow) = controller.handle_command(Command::Reset);
        assert_eq!(event, Some(Event::Reset));
        assert!(flow.is_continue());
        assert_eq!(controller.model().census(), initial);
        assert_eq!(controller.phase(), Phase::Idle);
        assert_eq!(controller.generation(), 0);
    }

    #[test]
    fn quiescent_model_completes_once() {
        let mut controller = sir_controller(SirParams { transmission: 0.0, seed: 1 });
        let _ = controller.handle_command(Command::Run);

        assert_eq!(controller.tick(), Some(Event::Complete));
        assert_eq!(controller.phase(), Phase::Completed);
        assert_eq!(controller.tick(), None);

        // Completion was already announced
        let (event, flow) = controller.handle_command(Command::Exit);
        assert_eq!(event, None);
        assert!(flow.is_break());
    }

    #[test]
    fn exit_reports_by_phase() {
        let mut controller = sir_controller(SirParams::default());
        assert_eq!(controller.handle_command(Command::Exit).0, Some(Event::Exited));

        let mut controller = sir_controller(SirParams::default());
        let _ = controller.handle_command(Command::Run);
        let _ = controller.handle_command(Command::Pause);
        assert_eq!(controller.handle_command(Command::Exit).0, Some(Event::Terminated));
    }

    #[test]
    fn unknown_commands_reach_the_model() {
        let mut controller = sir_controller(SirParams::default());
        assert_eq!(
            events(&mut controller, &["census", "wave"]),
            vec![Some("SIRModel census: Susceptible=80, Infected=1, Removed=0".to_string()), None]
        );
    }

    #[test]
    fn front_grid_shows_each_finished_generation() {
        let mut controller = sir_controller(SirParams { transmission: 1.0, seed: 1 });
        let view = controller.front_view();
        let centre = |v: &FrontView| v.read(|img| *img.get_pixel(4, 4));
        assert_eq!(centre(&view), crate::model::INFECTED_COLOR);

        let _ = controller.handle_command(Command::Step);
        assert_eq!(centre(&view), crate::model::REMOVED_COLOR);
        assert_eq!(view.read(|img| *img.get_pixel(4, 3)), crate::model::INFECTED_COLOR);
    }

    #[test]
    fn sinks_see_every_frame_of_a_run_in_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut controller = sir_controller(SirParams { transmission: 0.0, seed: 1 })
            .with_exporter(Box::new(Journal(journal.clone())));

        let _ = controller.handle_command(Command::Run);
        assert_eq!(controller.tick(), Some(Event::Complete));

        let calls = journal.lock().unwrap().clone();
        assert_eq!(calls, vec!["begin SIRModel", "frame 0", "frame 1", "finish"]);
    }

    #[test]
    fn steps_outside_a_run_are_not_exported() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut controller =
            sir_controller(SirParams::default()).with_exporter(Box::new(Journal(journal.clone())));
        let _ = controller.handle_command(Command::Step);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn threaded_open_process_runs_until_exit() {
        let raster = RasterBuffer::new(20, 20).unwrap();
        let params = SisParams { onset: Onset::Spontaneous(0.5), ..SisParams::sisa() };
        let model = Box::new(SisModel::new(params).unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut controller =
            Controller::new(raster, model, ControllerConfig::default()).with_shutdown(shutdown.clone());
        controller.configure();

        let channels = transport::channels();
        let (commands, events) = (channels.command_rx, channels.event_tx);
        let handle = thread::spawn(move || {
            controller.run(&commands, &events);
            controller.generation()
        });

        let wait = Duration::from_secs(5);
        channels.command_tx.send(Command::Run).unwrap();
        assert_eq!(channels.event_rx.recv_timeout(wait).unwrap(), Event::Started);

        thread::sleep(Duration::from_millis(30));
        channels.command_tx.send(Command::Pause).unwrap();
        assert_eq!(channels.event_rx.recv_timeout(wait).unwrap(), Event::Paused);

        channels.command_tx.send(Command::Exit).unwrap();
        assert_eq!(channels.event_rx.recv_timeout(wait).unwrap(), Event::Terminated);

        let generations = handle.join().unwrap();
        assert!(generations > 0);
        assert!(shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn idle_controller_waits_instead_of_stepping() {
        let raster = RasterBuffer::new(9, 9).unwrap();
        let model = Box::new(SirModel::new(SirParams { transmission: 1.0, seed: 1 }).unwrap());
        let config = ControllerConfig { idle_wait_ms: 5, ..ControllerConfig::default() };
        let mut controller = Controller::new(raster, model, config);
        controller.configure();
        let initial = controller.model().census();

        let channels = transport::channels();
        let (commands, events) = (channels.command_rx, channels.event_tx);
        let handle = thread::spawn(move || {
            controller.run(&commands, &events);
            controller
        });

        // Many idle waits elapse with nothing on the command channel
        thread::sleep(Duration::from_millis(100));
        channels.command_tx.send(Command::Exit).unwrap();
        let controller = handle.join().unwrap();

        assert_eq!(channels.event_rx.try_recv().unwrap(), Event::Exited);
        assert_eq!(controller.generation(), 0);
        assert_eq!(controller.phase(), Phase::Idle);
        assert_eq!(controller.model().census(), initial);
    }

    #[test]
    fn dropped_command_channel_ends_the_loop() {
        let mut controller = sir_controller(SirParams::default());
        let channels = transport::channels();
        drop(channels.command_tx);

        controller.run(&channels.command_rx, &channels.event_tx);
        assert_eq!(channels.event_rx.try_recv().unwrap(), Event::Exited);
    }
}
