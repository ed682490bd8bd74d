mod args;
mod kiosk;
mod models;
mod storage;

use anyhow::{Context, Result};
use chrono::{Local, Timelike};
use clap::Parser;
use log::{debug, error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use sicaf_capture::camera::{CameraBackend, CameraManager, DisplaySurface, StreamSpec};
use sicaf_capture::capture::capture_face;
use sicaf_capture::config::KioskConfig;
use sicaf_capture::control::{ControlSubmitter, ControlType};
use sicaf_capture::face::{FaceDetectorAdapter, ModelLoader};
use sicaf_capture::session::{SessionController, SessionOptions};
use sicaf_capture::settings::SettingsHandle;
use sicaf_capture::submit::{AttendanceSubmitter, HttpSubmitter, RecordType};

use args::{Args, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = load_config(&args)?;

    if args.download_models && !models::models_exist_in(&config.models_dir) {
        let dir = config.models_dir.clone();
        tokio::task::spawn_blocking(move || models::download_models(&dir))
            .await
            .context("Model download task failed")??;
    }
    config.models_dir = models::locate_models_dir(&config.models_dir);
    if !models::models_exist_in(&config.models_dir) {
        warn!(
            "Face models not found in {:?}; run with --download-models",
            config.models_dir
        );
    }

    match &args.command {
        Command::Asistencia { tipo } => {
            let submitter = Arc::new(HttpSubmitter::new(&config.api));
            run_kiosk(&args, config, submitter, RecordType::from(*tipo)).await
        }
        Command::Control { tipo, categoria } => {
            let tipo = ControlType::from(*tipo);
            let submitter = Arc::new(ControlSubmitter::new(&config.api, tipo, categoria.clone()));
            let record_type = record_type_for_control(tipo, Local::now().hour());
            run_kiosk(&args, config, submitter, record_type).await
        }
        Command::Enroll { output } => enroll(config, output.clone()).await,
    }
}

fn load_config(args: &Args) -> Result<KioskConfig> {
    let mut config = match &args.config {
        Some(path) => KioskConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => KioskConfig::load_default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Recognition for time control only validates; the shift tag just has to
/// be plausible for the time of day.
fn record_type_for_control(tipo: ControlType, hour: u32) -> RecordType {
    match (tipo, hour < 13) {
        (ControlType::Entrada, true) => RecordType::EntradaManana,
        (ControlType::Entrada, false) => RecordType::EntradaTarde,
        (ControlType::Salida, true) => RecordType::SalidaManana,
        (ControlType::Salida, false) => RecordType::SalidaTarde,
    }
}

#[cfg(feature = "hardware")]
fn backends() -> Result<(Arc<dyn CameraBackend>, Arc<dyn ModelLoader>)> {
    use sicaf_capture::dlib_model::DlibModelLoader;
    use sicaf_capture::opencv_camera::OpenCvCamera;

    Ok((Arc::new(OpenCvCamera), Arc::new(DlibModelLoader)))
}

#[cfg(not(feature = "hardware"))]
fn backends() -> Result<(Arc<dyn CameraBackend>, Arc<dyn ModelLoader>)> {
    anyhow::bail!("sicaf was built without camera and face model support; rebuild with --features hardware")
}

async fn run_kiosk(
    args: &Args,
    config: KioskConfig,
    submitter: Arc<dyn AttendanceSubmitter>,
    record_type: RecordType,
) -> Result<()> {
    let (camera_backend, loader) = backends()?;
    let camera = CameraManager::new(camera_backend, StreamSpec::from(&config.camera), DisplaySurface::new());
    let settings = SettingsHandle::new(config.settings.clone());
    let controller = SessionController::new(
        camera,
        submitter,
        settings.subscribe(),
        SessionOptions {
            record_type,
            timings: config.session.clone(),
            models_dir: config.models_dir.clone(),
        },
    );

    info!("Kiosk ready for {} against {}", record_type, config.api.base_url);
    let display = tokio::spawn(kiosk::render(controller.subscribe(), settings.subscribe()));

    // The camera may open while the models are still loading.
    if let Err(e) = controller.start_camera().await {
        error!("Camera start failed: {}", e);
    }
    controller.initialize(loader).await;

    let operator = operator_input()?;
    println!("{}", kiosk::CAMERA_TOGGLE_HINT);
    wait_for_shutdown(args, &settings, &controller, operator).await?;

    info!("Shutting down");
    controller.shutdown().await;
    display.abort();
    Ok(())
}

/// One message per line the operator enters. Reads on a plain thread so a
/// pending read never holds up runtime shutdown.
fn operator_input() -> Result<mpsc::UnboundedReceiver<()>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("operator-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() || tx.send(()).is_err() {
                    break;
                }
            }
        })
        .context("Failed to start operator input thread")?;
    Ok(rx)
}

async fn toggle_camera(controller: &SessionController) {
    if kiosk::wants_camera_start(&controller.snapshot().await) {
        info!("Operator requested camera start");
        if let Err(e) = controller.start_camera().await {
            error!("Camera start failed: {}", e);
        }
    } else {
        info!("Operator requested camera stop");
        controller.stop_camera().await;
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(
    args: &Args,
    settings: &SettingsHandle,
    controller: &SessionController,
    mut operator: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut operator_open = true;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                return Ok(());
            }
            _ = hangup.recv() => match load_config(args) {
                Ok(config) => {
                    info!("Configuration reloaded");
                    settings.update(config.settings);
                }
                Err(e) => warn!("Keeping current settings: {:#}", e),
            },
            key = operator.recv(), if operator_open => match key {
                Some(()) => toggle_camera(controller).await,
                None => {
                    debug!("Operator input closed");
                    operator_open = false;
                }
            },
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _args: &Args,
    _settings: &SettingsHandle,
    controller: &SessionController,
    mut operator: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let mut operator_open = true;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                return result.context("Failed to listen for Ctrl-C");
            }
            key = operator.recv(), if operator_open => match key {
                Some(()) => toggle_camera(controller).await,
                None => {
                    debug!("Operator input closed");
                    operator_open = false;
                }
            },
        }
    }
}

async fn enroll(config: KioskConfig, output: PathBuf) -> Result<()> {
    let (camera_backend, loader) = backends()?;
    let mut camera = CameraManager::new(camera_backend, StreamSpec::from(&config.camera), DisplaySurface::new());

    let models_dir = config.models_dir.clone();
    let model = tokio::task::spawn_blocking(move || loader.load(&models_dir))
        .await
        .context("Model loading task failed")?
        .context("Failed to load face models")?;
    let detector = FaceDetectorAdapter::with_model(model, camera.surface().clone());

    println!("Mire a la cámara{}", if config.settings.require_smile { " y sonría" } else { "" });
    let captured = capture_face(&mut camera, &detector, &config.settings, &config.session)
        .await
        .context("Face capture failed")?;

    storage::save_capture(&output, &captured)?;
    println!("Rostro capturado: {}", output.display());
    Ok(())
}
