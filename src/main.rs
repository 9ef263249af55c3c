#![windows_subsystem = "windows"]

use canvasstudio::app::CanvasStudioApp;
use canvasstudio::logger;
use eframe::egui;

fn main() -> Result<(), eframe::Error> {
    // Session log overwrites the previous run's log.
    logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 720.0])
            .with_maximized(true)
            .with_title("CanvasStudio"),
        ..Default::default()
    };

    eframe::run_native(
        "CanvasStudio",
        options,
        Box::new(|cc| Box::new(CanvasStudioApp::new(cc))),
    )
}
