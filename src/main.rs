use peripheral_coordinator::domain::models::{AdapterState, PeripheralDescriptor};
use peripheral_coordinator::domain::settings::SettingsService;
use peripheral_coordinator::infrastructure::bluetooth::simulated::SimulatedRadio;
use peripheral_coordinator::infrastructure::bluetooth::Coordinator;
use peripheral_coordinator::infrastructure::logging;
use peripheral_coordinator::presentation::console;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

fn demo_peripherals() -> Vec<PeripheralDescriptor> {
    vec![
        PeripheralDescriptor::connectable("C4:7C:8D:6A:11:02")
            .with_local_name("HR Strap")
            .with_rssi(-58),
        PeripheralDescriptor::new("F0:9E:1A:22:00:7B")
            .with_local_name("Beacon")
            .with_rssi(-81),
        PeripheralDescriptor::connectable("D8:3A:DD:40:5E:19")
            .with_name("Thermo")
            .with_rssi(-67),
        PeripheralDescriptor::connectable("C4:7C:8D:6A:11:02")
            .with_local_name("HR Strap (again)")
            .with_rssi(-55),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Peripheral Coordinator");
    info!("Settings file: {}", settings_service.path().display());

    let radio = Arc::new(
        SimulatedRadio::new()
            .with_auto_scan(Duration::from_millis(400))
            .with_peripherals(demo_peripherals()),
    );
    radio.set_adapter_state(AdapterState::PoweredOff);
    radio.set_bonded(vec![
        PeripheralDescriptor::new("D8:3A:DD:40:5E:19").with_name("Thermo")
    ]);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let coordinator = Arc::new(Coordinator::new(
        radio.clone(),
        radio.clone(),
        &settings,
        event_tx,
    ));

    let printer = tokio::spawn(console::print_events(event_rx));
    let results = tokio::spawn(console::print_scan_results(coordinator.watch()));

    coordinator.start().await;
    print!("{}", console::render_snapshot(&coordinator.snapshot()));

    let outcome = console::run(coordinator.clone()).await;

    coordinator.shutdown().await;
    results.abort();
    drop(coordinator);
    let _ = printer.await;

    outcome
}
