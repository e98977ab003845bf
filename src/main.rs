use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use smart_lamp_link::devices::{CloudDriver, CloudLamp, LampDriver, SmartLamp};
use smart_lamp_link::domain::light::LightChange;
use smart_lamp_link::domain::models::{Capability, CapabilitySink, CapabilityValue};
use smart_lamp_link::domain::settings::SettingsService;
use smart_lamp_link::infrastructure::bluetooth::native::NativeScanner;
use smart_lamp_link::infrastructure::bluetooth::protocol;
use smart_lamp_link::infrastructure::cloud::CloudClient;
use smart_lamp_link::infrastructure::logging;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "smart-lamp", version, about = "Control Luke Roberts lamps over BLE or the cloud")]
struct Cli {
    /// Settings file (default: user config dir)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Lamp id; the first discovered lamp when omitted
    #[arg(long, global = true)]
    lamp: Option<String>,

    /// BLE scan duration in seconds
    #[arg(long, default_value_t = 5)]
    scan_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List lamps in BLE range
    Scan,
    On,
    Off,
    /// Brightness, 0.0-1.0
    Dim { level: f64 },
    /// Uplight color, hue and saturation 0.0-1.0
    Color { hue: f64, saturation: f64 },
    /// Downlight temperature, 0.0 (cold) - 1.0 (warm)
    Temperature { temperature: f64 },
    /// Select a stored scene (0 = off, 255 = last scene)
    Scene { id: u8 },
    /// Read scene names from the lamp
    Scenes { query: Option<String> },
    /// List lamps of the cloud account
    CloudList,
    /// Switch a lamp through the cloud
    CloudPower { id: String, state: Power },
}

#[derive(Clone, Copy, ValueEnum)]
enum Power {
    On,
    Off,
}

/// Host stand-in that keeps values for this run and logs them
#[derive(Default)]
struct ConsoleSink {
    values: Mutex<HashMap<Capability, CapabilityValue>>,
}

impl CapabilitySink for ConsoleSink {
    fn capability_value(&self, capability: Capability) -> Option<CapabilityValue> {
        self.values.lock().ok()?.get(&capability).copied()
    }

    fn set_capability_value(&self, capability: Capability, value: CapabilityValue) {
        info!("{:?} = {:?}", capability, value);
        if let Ok(mut values) = self.values.lock() {
            values.insert(capability, value);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => SettingsService::from_path(path.clone()),
        None => SettingsService::new()?,
    };
    let _guard = logging::init_logger(&settings.get().log_settings)?;
    debug!("Settings from {}", settings.path().display());

    let sink: Arc<dyn CapabilitySink> = Arc::new(ConsoleSink::default());

    let change = match &cli.command {
        Command::CloudList => {
            let driver = CloudDriver::new(CloudClient::new(&settings.get().cloud)?);
            for lamp in driver.pair_list_devices().await? {
                println!("{}\t{}\tapi {:?}", lamp.id, lamp.name, lamp.api_version);
            }
            return Ok(());
        }
        Command::CloudPower { id, state } => {
            let lamp = CloudLamp::new(id, CloudClient::new(&settings.get().cloud)?, sink);
            lamp.on_capability_change(LightChange::power(matches!(state, Power::On)))
                .await?;
            return Ok(());
        }
        Command::On => Some(LightChange::power(true)),
        Command::Off => Some(LightChange::power(false)),
        Command::Dim { level } => Some(LightChange::dim(*level)),
        Command::Color { hue, saturation } => Some(LightChange::color(*hue, *saturation)),
        Command::Temperature { temperature } => Some(LightChange::temperature(*temperature)),
        Command::Scan | Command::Scene { .. } | Command::Scenes { .. } => None,
    };

    let service_uuid = protocol::parse_uuid(&settings.get().lamp.service_uuid)
        .context("invalid service uuid in settings")?;
    let scanner = NativeScanner::new(Duration::from_secs(cli.scan_secs)).await?;
    let driver = LampDriver::new(Arc::new(scanner), service_uuid);
    let found = driver.pair_list_devices().await?;

    if let Command::Scan = cli.command {
        for lamp in &found {
            println!("{}\t{}", lamp.id, lamp.name);
        }
        return Ok(());
    }

    let id = match cli.lamp {
        Some(id) => id,
        None => match found.first() {
            Some(lamp) => lamp.id.clone(),
            None => bail!("no lamp found"),
        },
    };
    let lamp = SmartLamp::new(driver.get_lamp(&id)?, &settings.get().lamp, sink)?;
    settings.add_known_lamp(&id)?;

    match cli.command {
        Command::Scene { id } => lamp.set_scene(id).await?,
        Command::Scenes { query } => {
            lamp.refresh_scenes().await?;
            let scenes = match query {
                Some(query) => lamp.search_scenes(&query),
                None => lamp.scenes(),
            };
            for scene in scenes {
                println!("{:3}\t{}", scene.id, scene.name);
            }
        }
        _ => {
            if let Some(change) = change {
                lamp.on_capability_change(change).await?;
            }
        }
    }

    if lamp.pending_commands() > 0 {
        bail!("{} commands were not delivered", lamp.pending_commands());
    }
    lamp.shutdown().await;
    Ok(())
}
