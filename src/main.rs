//! INA219 power monitor

use std::process;
use std::thread;

use powerwatch_common::coordinator::{PollingCoordinator, Trigger};
use powerwatch_common::hw::Ina219;
use powerwatch_common::observer;

use crate::output::Report;

mod input;
mod opts;
mod output;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let configuration = match opts::parse() {
        Ok(configuration) => configuration,
        Err(e) => {
            use opts::Error::*;
            match e {
                Help(ref msg) => println!("{}", msg),
                _ => println!("Initialization failed.\n{}", e),
            };
            process::exit(1);
        },
    };

    let device = *configuration.get_device();
    let interval = configuration.get_interval();
    let result = PollingCoordinator::new(device, Ina219::new(device), Trigger::Every(interval));
    let coordinator = match result {
        Ok(coordinator) => coordinator,
        Err(e) => {
            println!("Failed to start polling.\n{}", e);
            process::exit(1);
        },
    };

    // Abort setup entirely if the device is not there.
    if let Err(e) = coordinator.initialize_and_refresh_once() {
        println!("Cannot connect to {} on I2C bus {}.\n{}", device.title(), device.bus_id, e);
        process::exit(1);
    }
    log::info!("main: monitoring {} every {:?}", device.title(), interval);

    let observers = observer::bind_all(&coordinator);
    let writer = configuration.get_writer();
    let mut reported = 0;
    loop {
        let report = Report::collect(coordinator.config(), &observers, coordinator.state());
        if let Err(e) = writer.write(&report) {
            log::error!("main: {}", e);
        }

        reported += 1;
        if configuration.get_count().map(|count| reported >= count).unwrap_or(false) {
            break;
        }
        thread::sleep(interval);
    }

    coordinator.shutdown();
}
