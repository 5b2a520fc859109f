//! Snapshot images of the field.
//!
//! Writes binary PPM (P6) files: one `scale x scale` block per patch, with
//! animals painted over the patch they stand on.

use crate::model::{Animal, GrassPatch, PatchKind, Sex, Species, State};
use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

type Rgb = [u8; 3];

const GRASS: Rgb = [0x00, 0xFF, 0x00];
const BARE: Rgb = [0xCA, 0xA8, 0x00];
const ROCK: Rgb = [0x90, 0x8F, 0x8A];

pub fn patch_color(patch: &GrassPatch) -> Rgb {
    match patch.kind() {
        PatchKind::Rock => ROCK,
        PatchKind::Grass if patch.is_eaten() => BARE,
        PatchKind::Grass => GRASS,
    }
}

pub fn animal_color(animal: &Animal) -> Rgb {
    match (animal.species, animal.sex, animal.is_pregnant()) {
        (Species::Predator, _, true) => [0xFF, 0xFF, 0x66],
        (Species::Predator, Sex::Female, false) => [0xFF, 0x99, 0x33],
        (Species::Predator, Sex::Male, false) => [0xFF, 0x80, 0x00],
        (Species::Prey, _, true) => [0xCC, 0xE5, 0xFF],
        (Species::Prey, Sex::Female, false) => [0xF5, 0xF3, 0xEC],
        (Species::Prey, Sex::Male, false) => [0xDE, 0xD9, 0xC2],
    }
}

/// Rasterize a state into row-major pixels, `scale` pixels per patch side.
pub fn rasterize(state: &State, scale: usize) -> (usize, usize, Vec<Rgb>) {
    let field = &state.field;
    let (width, height) = (field.width() * scale, field.height() * scale);

    let mut cells: Vec<Rgb> = field.patches().iter().map(patch_color).collect();
    // Predators are painted last so they stay visible over prey.
    let mut animals: Vec<&Animal> = state.animals.iter().filter(|a| a.is_alive()).collect();
    animals.sort_by_key(|a| a.species == Species::Predator);
    for animal in animals {
        cells[field.cell_of(&animal.pos)] = animal_color(animal);
    }

    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            pixels.push(cells[(y / scale) * field.width() + x / scale]);
        }
    }
    (width, height, pixels)
}

pub fn write_ppm<P: AsRef<Path>>(state: &State, scale: usize, file: P) -> Result<()> {
    let file = file.as_ref();
    let (width, height, pixels) = rasterize(state, scale);

    let handle = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(handle);
    write!(writer, "P6\n{width} {height}\n255\n").context("failed to write header")?;
    for pixel in pixels {
        writer.write_all(&pixel).context("failed to write pixel")?;
    }
    writer.flush().context("failed to flush writer stream")?;

    log::info!("rendered {file:?} ({width}x{height})");
    Ok(())
}
