//! Robocar control-core binary.
//!
//! Wires the components together, runs the periodic workers and the
//! supervisor, and handles signals for orderly shutdown. On hosts without
//! the real GPIO / remote / audio stacks it runs against the in-crate
//! backends (`MockHal`, `NullLink`, `NullBackend`); the embedding is
//! expected to swap those for real ones and to feed edge events (echo,
//! encoder pulses, scan button) into the components.

use std::path::Path;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use robocar::audio::{Audio, NullBackend};
use robocar::battery::PowerMonitor;
use robocar::config::{pins, Options, DEFAULT_SPEED, MIN_CLEARANCE_CM};
use robocar::hal::mock::MockHal;
use robocar::hal::{Hal, HalError, Level, Pull};
use robocar::horn::Horn;
use robocar::motor::{Direction, Motor, MotorPins, Side};
use robocar::remote::{ButtonState, CommandInterpreter, NullLink, RemoteLink, TargetSpeed};
use robocar::sonar::{obstacle_channel, ObstacleGate, ObstacleSensor};
use robocar::speed::SpeedController;
use robocar::supervisor::{AvoidanceTuning, Supervisor};
use robocar::workers::WorkerSet;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

struct Car {
    hal: Arc<dyn Hal>,
    options: Options,
    left: Arc<Motor>,
    right: Arc<Motor>,
    horn: Arc<Horn>,
    audio: Arc<Audio>,
    link: Arc<dyn RemoteLink>,
    target: Arc<TargetSpeed>,
    buttons: Arc<ButtonState>,
    connected: Arc<AtomicBool>,
    sensor: Arc<ObstacleSensor>,
    gate: ObstacleGate,
    monitor: Arc<PowerMonitor>,
    workers: Arc<WorkerSet>,
}

fn build(options: Options) -> (Car, robocar::sonar::ObstacleWait) {
    let mock = Arc::new(MockHal::new());
    // sane simulated inputs: battery good, scan button released
    mock.set_input_level(pins::BATTERY_SENSE, Level::High);
    mock.set_input_level(pins::SCAN_BUTTON, Level::High);
    let hal = mock as Arc<dyn Hal>;

    let left = Arc::new(Motor::new(
        Side::Left,
        MotorPins {
            enable: pins::LEFT_ENABLE,
            in1: pins::LEFT_IN1,
            in2: pins::LEFT_IN2,
            encoder: pins::LEFT_ENCODER,
        },
        hal.clone(),
    ));
    let right = Arc::new(Motor::new(
        Side::Right,
        MotorPins {
            enable: pins::RIGHT_ENABLE,
            in1: pins::RIGHT_IN1,
            in2: pins::RIGHT_IN2,
            encoder: pins::RIGHT_ENCODER,
        },
        hal.clone(),
    ));
    let horn = Arc::new(Horn::new(hal.clone(), pins::HORN));
    let (gate, wait) = obstacle_channel();
    let sensor = Arc::new(ObstacleSensor::new(
        hal.clone(),
        pins::SONAR_TRIGGER,
        pins::SONAR_ECHO,
        MIN_CLEARANCE_CM,
        !options.remote_only,
        gate.clone(),
    ));
    let monitor = Arc::new(PowerMonitor::new(
        hal.clone(),
        pins::BATTERY_SENSE,
        horn.clone(),
    ));

    let car = Car {
        hal,
        options,
        left,
        right,
        horn: horn.clone(),
        audio: Arc::new(Audio::new(Arc::new(NullBackend))),
        link: Arc::new(NullLink),
        target: Arc::new(TargetSpeed::new(DEFAULT_SPEED)),
        buttons: Arc::new(ButtonState::new()),
        connected: Arc::new(AtomicBool::new(false)),
        sensor,
        gate,
        monitor,
        workers: Arc::new(WorkerSet::new()),
    };
    (car, wait)
}

fn setup_pins(car: &Car) -> Result<(), HalError> {
    car.hal.set_output(pins::HORN)?;
    car.hal.write(pins::HORN, Level::Low);
    car.left.setup(car.options.use_encoder)?;
    car.right.setup(car.options.use_encoder)?;
    if !car.options.remote_only {
        car.sensor.setup()?;
    }
    if car.options.check_battery {
        car.hal.set_input(pins::BATTERY_SENSE, Pull::Down)?;
    }
    car.hal.set_input(pins::SCAN_BUTTON, Pull::Up)?;
    Ok(())
}

fn shutdown(car: &Car) {
    info!("shutting down");
    car.left.stop();
    car.right.stop();
    car.link.disconnect();
    car.workers.request_shutdown();
    car.gate.shutdown();
    car.workers.join_all();
    car.hal.write(pins::HORN, Level::Low);
    car.left.release();
    car.right.release();
    car.sensor.release();
    car.hal.release(pins::HORN);
    car.hal.release(pins::BATTERY_SENSE);
    car.hal.release(pins::SCAN_BUTTON);
}

fn main() {
    env_logger::init();

    let options = match Options::parse(std::env::args()) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}", e);
            exit(2);
        }
    };
    info!("starting with {:?}", options);
    install_signal_handlers();

    let (car, wait) = build(options);
    if let Err(e) = setup_pins(&car) {
        error!("hardware initialisation failed: {}", e);
        shutdown(&car);
        exit(1);
    }

    // Battery gate: refuse to start on depleted motor batteries.
    if car.options.check_battery {
        car.monitor.sample();
        if !car.monitor.is_good() {
            error!("motor battery is depleted, not starting");
            shutdown(&car);
            exit(1);
        }
        let monitor = car.monitor.clone();
        car.workers
            .spawn_periodic("battery-poll", Duration::from_secs(15), move || {
                monitor.sample();
            });
    }

    // Remote controller is optional: without one the car drives itself
    // unless remote-only mode was requested.
    match car.link.connect(Duration::from_secs(5)) {
        Ok(()) => {
            info!("remote controller connected");
            car.connected.store(true, Ordering::Release);
            car.link.set_speed_leds(car.target.led_count());
        }
        Err(e) => warn!("{}; continuing without remote", e),
    }

    // Remote events flow through the interpreter; the dispatch worker
    // drains whatever the connectivity stack queued.
    let interpreter = Arc::new(CommandInterpreter::new(
        car.left.clone(),
        car.right.clone(),
        car.target.clone(),
        car.buttons.clone(),
        car.horn.clone(),
        car.audio.clone(),
        car.link.clone(),
        car.workers.clone(),
        car.options.alarm_file.clone(),
        car.options.soft_turn,
    ));
    {
        let link = car.link.clone();
        let interpreter = interpreter.clone();
        car.workers
            .spawn_periodic("remote-dispatch", Duration::from_millis(20), move || {
                for event in link.poll_events() {
                    interpreter.handle(event);
                }
            });
    }

    if !car.options.remote_only {
        let sensor = car.sensor.clone();
        car.workers
            .spawn_periodic("sonar-trigger", Duration::from_millis(60), move || {
                sensor.trigger();
            });
    }

    if car.options.use_encoder {
        let controller = SpeedController::new(car.left.clone(), car.right.clone());
        car.workers
            .spawn_periodic("speed-loop", Duration::from_millis(200), move || {
                controller.tick();
            });
    }

    car.audio.play_blocking(Path::new("sounds/ready.wav"));

    // No remote and autonomy allowed: drive forward at the default speed.
    if !car.connected.load(Ordering::Acquire) && !car.options.remote_only {
        let v = car.target.get();
        car.left.set_speed(v, Direction::Forward);
        car.right.set_speed(v, Direction::Forward);
        info!("no remote: driving autonomously at speed {}", v);
    }

    let supervisor = Arc::new(Supervisor::new(
        car.hal.clone(),
        car.left.clone(),
        car.right.clone(),
        car.sensor.clone(),
        wait,
        car.target.clone(),
        car.buttons.clone(),
        car.connected.clone(),
        AvoidanceTuning::default(),
    ));
    let running = supervisor.running_flag();
    let supervisor_thread = supervisor.start_background();

    while !SHUTDOWN.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    running.store(false, Ordering::Release);
    shutdown(&car);
    if supervisor_thread.join().is_err() {
        error!("supervisor thread panicked");
    }
    info!("bye");
}
