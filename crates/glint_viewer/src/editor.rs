//! Shader source editor windows.
//!
//! Each stage gets a text editor bound to its file on disk. A successful
//! compile writes the text back to the file; a failed one turns the
//! diagnostic into per-line markers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glint_core::diagnostics::ErrorMarkers;
use glint_viewport::{ProgramError, ShaderStage, SwapOutcome};

pub struct ShaderEditor {
    pub stage: ShaderStage,
    pub path: PathBuf,
    pub text: String,
    pub markers: ErrorMarkers,
    pub open: bool,
    status: String,
}

impl ShaderEditor {
    /// Read `path`, or start from `fallback` when it cannot be read.
    pub fn load(stage: ShaderStage, path: &Path, fallback: &str) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!(
                    "Cannot read {} shader {}: {}, using built-in source",
                    stage.name(),
                    path.display(),
                    e
                );
                fallback.to_string()
            }
        };

        Self {
            stage,
            path: path.to_path_buf(),
            text,
            markers: ErrorMarkers::new(),
            open: true,
            status: String::new(),
        }
    }

    pub fn title(&self) -> String {
        let name = self.stage.name();
        let mut title = name[..1].to_uppercase() + &name[1..];
        title.push_str(" Shader");
        title
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Record the result of compiling the editor text.
    ///
    /// On success the markers are cleared and the text is saved to the file.
    pub fn apply_outcome(&mut self, outcome: &SwapOutcome) -> Result<()> {
        match outcome {
            SwapOutcome::Swapped => {
                self.markers.clear();
                self.save()?;
                self.status = format!("Compiled and saved {}", self.path.display());
            }
            SwapOutcome::CompileFailed(log) => {
                self.markers = outcome.markers();
                self.status = "Compile failed".to_string();
                log::warn!("{} shader failed to compile:\n{}", self.stage.name(), log);
            }
            SwapOutcome::LinkFailed(log) => {
                self.markers = outcome.markers();
                self.status = "Link failed, previous program kept".to_string();
                log::warn!("{} shader failed to link:\n{}", self.stage.name(), log);
            }
        }
        Ok(())
    }

    /// Show why the editor text could not start; a built-in shader runs
    /// in its place until the text compiles.
    pub fn show_startup_failure(&mut self, error: &ProgramError) {
        self.markers = ErrorMarkers::from_log(error.log());
        self.status = "Failed at startup, running the built-in shader".to_string();
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating {}", parent.display()))?;
        }
        fs::write(&self.path, &self.text)
            .with_context(|| format!("Saving shader {}", self.path.display()))
    }

    /// Draw the editor window. Returns true when Compile was pressed.
    pub fn show(&mut self, ctx: &egui::Context) -> bool {
        let mut compile = false;
        let mut open = self.open;

        egui::Window::new(self.title())
            .open(&mut open)
            .default_size([520.0, 480.0])
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    if ui.button("Compile").clicked() {
                        compile = true;
                    }
                    ui.label(egui::RichText::new(self.path.display().to_string()).monospace());
                });
                if !self.status.is_empty() {
                    ui.label(&self.status);
                }
                ui.separator();

                egui::ScrollArea::vertical()
                    .max_height(ui.available_height() - 120.0)
                    .show(ui, |ui| {
                        ui.add(
                            egui::TextEdit::multiline(&mut self.text)
                                .code_editor()
                                .desired_rows(24)
                                .desired_width(f32::INFINITY),
                        );
                    });

                if !self.markers.is_empty() {
                    ui.separator();
                    egui::ScrollArea::vertical()
                        .id_salt("markers")
                        .max_height(100.0)
                        .show(ui, |ui| {
                            for (line, message) in self.markers.iter() {
                                ui.colored_label(
                                    egui::Color32::LIGHT_RED,
                                    format!("Line {}: {}", line, message),
                                );
                            }
                            for message in self.markers.unplaced() {
                                ui.colored_label(egui::Color32::LIGHT_RED, message);
                            }
                        });
                }
            });

        self.open = open;
        compile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("glint_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_missing_file_uses_fallback() {
        let editor = ShaderEditor::load(
            ShaderStage::Fragment,
            Path::new("/no/such/fragment.wgsl"),
            "fallback source",
        );
        assert_eq!(editor.text, "fallback source");
        assert_eq!(editor.title(), "Fragment Shader");
    }

    #[test]
    fn test_success_saves_and_clears_markers() {
        let path = temp_path("ok.wgsl");
        let mut editor = ShaderEditor::load(ShaderStage::Vertex, &path, "old");
        editor.markers = ErrorMarkers::from_log("0:3(1): error: bad");
        editor.text = "new source".to_string();

        editor.apply_outcome(&SwapOutcome::Swapped).unwrap();

        assert!(editor.markers.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "new source");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_failure_marks_lines_and_keeps_file() {
        let path = temp_path("bad.wgsl");
        fs::write(&path, "last good").unwrap();
        let mut editor = ShaderEditor::load(ShaderStage::Fragment, &path, "");
        editor.text = "broken".to_string();

        let outcome = SwapOutcome::CompileFailed("0:7(12): error: syntax error".to_string());
        editor.apply_outcome(&outcome).unwrap();

        assert_eq!(editor.markers.get(7), Some("syntax error"));
        assert_eq!(editor.status(), "Compile failed");
        assert_eq!(fs::read_to_string(&path).unwrap(), "last good");
        fs::remove_file(&path).ok();
    }
}
