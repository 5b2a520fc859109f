//! Simulation data types.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Predator,
    Prey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

/// Stage of life, derived from age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifeStage {
    Juvenile,
    Fertile,
    Senescent,
    Dead,
}

/// Why an animal died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Death {
    Starvation,
    OldAge,
    Predation,
}

/// Continuous position inside the field, in patch units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// What an animal is currently heading for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Patch(usize),
    Animal(u64),
    Point(Position),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchKind {
    Grass,
    Rock,
}

/// The content of one field cell.
///
/// An eaten grass patch carries a regrowth timer that counts down to zero,
/// at which point the grass is edible again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrassPatch {
    kind: PatchKind,
    regrowth_timer: u32,
    regrow_ticks: u32,
}

impl GrassPatch {
    pub fn new(kind: PatchKind, regrow_ticks: u32) -> Self {
        Self {
            kind,
            regrowth_timer: 0,
            regrow_ticks,
        }
    }

    pub fn kind(&self) -> PatchKind {
        self.kind
    }

    #[cfg(test)]
    pub fn regrowth_timer(&self) -> u32 {
        self.regrowth_timer
    }

    pub fn is_eaten(&self) -> bool {
        self.kind == PatchKind::Grass && self.regrowth_timer > 0
    }

    pub fn is_edible(&self) -> bool {
        self.kind == PatchKind::Grass && self.regrowth_timer == 0
    }

    /// Advance regrowth by one tick.
    pub fn tick(&mut self) {
        self.regrowth_timer = self.regrowth_timer.saturating_sub(1);
    }

    /// Eat the grass.
    ///
    /// Returns `None` without touching the patch if it is rock or already eaten.
    pub fn consume(&mut self) -> Option<()> {
        if !self.is_edible() {
            return None;
        }
        // A zero regrowth time still leaves the patch bare for one tick.
        self.regrowth_timer = self.regrow_ticks.max(1);
        Some(())
    }
}

/// Rectangular grid of patches, stored row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    width: usize,
    height: usize,
    patches: Vec<GrassPatch>,
}

impl Field {
    pub fn new(width: usize, height: usize, patches: Vec<GrassPatch>) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("field must be at least 1x1, but is {width}x{height}");
        }
        let (n_patches, n_cells) = (patches.len(), width * height);
        if n_patches != n_cells {
            bail!("field of {width}x{height} needs {n_cells} patches, but has {n_patches}");
        }
        Ok(Self {
            width,
            height,
            patches,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn patches(&self) -> &[GrassPatch] {
        &self.patches
    }

    pub fn patch_mut(&mut self, idx: usize) -> &mut GrassPatch {
        &mut self.patches[idx]
    }

    pub fn tick(&mut self) {
        self.patches.iter_mut().for_each(GrassPatch::tick);
    }

    /// Center of a patch.
    pub fn center(&self, idx: usize) -> Position {
        Position::new((idx % self.width) as f64, (idx / self.width) as f64)
    }

    /// Index of the patch whose center is closest to `pos`.
    pub fn cell_of(&self, pos: &Position) -> usize {
        let col = (pos.x.round().max(0.0) as usize).min(self.width - 1);
        let row = (pos.y.round().max(0.0) as usize).min(self.height - 1);
        row * self.width + col
    }

    /// Clamp a position to the field.
    pub fn clamp(&self, pos: Position) -> Position {
        Position::new(
            pos.x.clamp(0.0, (self.width - 1) as f64),
            pos.y.clamp(0.0, (self.height - 1) as f64),
        )
    }

    /// Nearest edible patch within `radius` of `pos`, lowest index on ties.
    pub fn nearest_edible(&self, pos: &Position, radius: f64) -> Option<(usize, f64)> {
        let col_min = (pos.x - radius).ceil().max(0.0) as usize;
        let row_min = (pos.y - radius).ceil().max(0.0) as usize;
        let col_max = ((pos.x + radius).floor().max(0.0) as usize).min(self.width - 1);
        let row_max = ((pos.y + radius).floor().max(0.0) as usize).min(self.height - 1);

        let mut best: Option<(usize, f64)> = None;
        for row in row_min..=row_max {
            for col in col_min..=col_max {
                let idx = row * self.width + col;
                if !self.patches[idx].is_edible() {
                    continue;
                }
                let dist = pos.distance(&self.center(idx));
                if dist > radius {
                    continue;
                }
                if best.is_none_or(|(_, best_dist)| dist < best_dist) {
                    best = Some((idx, dist));
                }
            }
        }
        best
    }

    pub fn n_edible(&self) -> usize {
        self.patches.iter().filter(|p| p.is_edible()).count()
    }

    pub fn n_grass(&self) -> usize {
        self.patches
            .iter()
            .filter(|p| p.kind() == PatchKind::Grass)
            .count()
    }
}

/// Animal of the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Animal {
    pub id: u64,
    pub species: Species,
    pub sex: Sex,
    /// Age in years.
    pub age: f64,
    pub energy: f64,
    pub pos: Position,
    /// Age at which this animal dies of old age.
    pub lifespan: f64,
    pub target: Option<Target>,
    /// Ticks spent pregnant so far.
    pub gestation: Option<u32>,
    pub death: Option<Death>,
}

impl Animal {
    pub fn is_alive(&self) -> bool {
        self.death.is_none()
    }

    pub fn is_pregnant(&self) -> bool {
        self.gestation.is_some()
    }

    /// Mark the animal dead, keeping the first recorded cause.
    pub fn kill(&mut self, cause: Death) {
        if self.death.is_none() {
            self.death = Some(cause);
        }
    }
}

/// Deaths and births over an interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Events {
    pub births: usize,
    pub starved: usize,
    pub aged_out: usize,
    pub eaten: usize,
}

impl Events {
    pub fn record_death(&mut self, cause: Death) {
        match cause {
            Death::Starvation => self.starved += 1,
            Death::OldAge => self.aged_out += 1,
            Death::Predation => self.eaten += 1,
        }
    }
}

/// State of the simulation at a given tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub tick: u64,
    pub field: Field,
    pub animals: Vec<Animal>,
    pub next_id: u64,
    /// Events since the last census.
    pub events: Events,
}

impl State {
    pub fn count(&self, species: Species, sex: Sex) -> usize {
        self.animals
            .iter()
            .filter(|a| a.is_alive() && a.species == species && a.sex == sex)
            .count()
    }

    pub fn n_alive(&self) -> usize {
        self.animals.iter().filter(|a| a.is_alive()).count()
    }
}

/// Summary of the simulation written at every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Census {
    pub tick: u64,
    pub n_predator_male: usize,
    pub n_predator_female: usize,
    pub n_prey_male: usize,
    pub n_prey_female: usize,
    pub n_pregnant: usize,
    /// Fraction of grass patches that are edible.
    pub grass_cover: f64,
    pub events: Events,
}

impl Census {
    pub fn new(state: &State) -> Self {
        let n_grass = state.field.n_grass();
        Self {
            tick: state.tick,
            n_predator_male: state.count(Species::Predator, Sex::Male),
            n_predator_female: state.count(Species::Predator, Sex::Female),
            n_prey_male: state.count(Species::Prey, Sex::Male),
            n_prey_female: state.count(Species::Prey, Sex::Female),
            n_pregnant: state
                .animals
                .iter()
                .filter(|a| a.is_alive() && a.is_pregnant())
                .count(),
            grass_cover: if n_grass > 0 {
                state.field.n_edible() as f64 / n_grass as f64
            } else {
                0.0
            },
            events: state.events,
        }
    }

    pub fn n_predator(&self) -> usize {
        self.n_predator_male + self.n_predator_female
    }

    pub fn n_prey(&self) -> usize {
        self.n_prey_male + self.n_prey_female
    }

    pub fn extinct(&self) -> bool {
        self.n_predator() + self.n_prey() == 0
    }
}
