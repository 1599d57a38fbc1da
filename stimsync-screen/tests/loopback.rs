use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use stimsync_core::{Command, OffsetUpdate, StimulusProgram, encode_batch};
use stimsync_screen::{CommandInbox, NullSink, PlaybackPhase, ScreenConfig, ScreenDriver};
use stimsync_timing::ManualClock;

type LoopbackDriver = ScreenDriver<CommandInbox, NullSink, StimulusProgram, ManualClock>;

fn step_until(driver: &mut LoopbackDriver, mut done: impl FnMut(&LoopbackDriver) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        driver.step();
        if done(driver) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn screen_applies_batches_and_offsets_over_loopback() {
    let config = ScreenConfig {
        name: "loopback".to_string(),
        command_addr: "127.0.0.1:0".to_string(),
        offset_addr: Some("127.0.0.1:0".to_string()),
        ..ScreenConfig::default()
    };
    let clock = ManualClock::new(500.0);
    let mut driver = ScreenDriver::bind(&config, clock.clone(), NullSink).unwrap();
    let command_addr = driver.source().local_addr();
    let offset_addr = driver.offset_listener().unwrap().local_addr();

    let mut controller = TcpStream::connect(command_addr).unwrap();
    let batch = vec![
        Command::new("load_stim")
            .with_kwarg("name", "SineGrating")
            .with_kwarg("rate", 20.0),
        Command::new("load_stim")
            .with_kwarg("name", "ConstantBackground")
            .with_kwarg("hold", true),
        Command::new("start_stim").with_kwarg("t", 500.0),
    ];
    controller.write_all(&encode_batch(&batch).unwrap()).unwrap();

    assert!(step_until(&mut driver, |d| {
        d.runtime().playback().phase == PlaybackPhase::Running
    }));
    // the whole batch landed before the same frame
    assert_eq!(driver.runtime().stimuli().len(), 2);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let update = serde_json::to_vec(&OffsetUpdate::Theta { radians: 0.3 }).unwrap();
    sender.send_to(&update, offset_addr).unwrap();
    assert!(step_until(&mut driver, |d| {
        d.runtime().offset_handle().snapshot().theta_offset == 0.3
    }));

    clock.set(502.0);
    controller
        .write_all(&encode_batch(&[Command::new("pause_stim").with_kwarg("t", 501.0)]).unwrap())
        .unwrap();
    assert!(step_until(&mut driver, |d| {
        d.runtime().playback().phase == PlaybackPhase::Paused
    }));
    assert_eq!(driver.runtime().playback().accumulated, 1.0);

    controller
        .write_all(&encode_batch(&[Command::new("quit")]).unwrap())
        .unwrap();
    assert!(step_until(&mut driver, |d| d.runtime().quit_requested()));
}
