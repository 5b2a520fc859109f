//! Interaction rules.
//!
//! Pure decision functions parameterized by the configuration.
//! They never mutate the animals they look at; the engine applies the outcome.

use crate::config::{Config, SpeciesConfig};
use crate::model::{Animal, LifeStage, Position, Sex, Species};

pub struct Rules<'a> {
    cfg: &'a Config,
}

impl<'a> Rules<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    pub fn species(&self, species: Species) -> &'a SpeciesConfig {
        match species {
            Species::Predator => &self.cfg.predator,
            Species::Prey => &self.cfg.prey,
        }
    }

    pub fn life_stage(&self, animal: &Animal) -> LifeStage {
        if !animal.is_alive() || animal.age > animal.lifespan {
            LifeStage::Dead
        } else if animal.age < self.cfg.life.min_fertile_age {
            LifeStage::Juvenile
        } else if animal.age <= self.cfg.life.max_fertile_age {
            LifeStage::Fertile
        } else {
            LifeStage::Senescent
        }
    }

    pub fn is_hungry(&self, animal: &Animal) -> bool {
        animal.energy < self.cfg.life.hunger_threshold
    }

    /// Current speed, following the animal's age curve and slowed by pregnancy.
    pub fn speed(&self, animal: &Animal) -> f64 {
        let max_speed = self.species(animal.species).max_speed;
        let mut speed = max_speed * age_speed_factor(animal.age / animal.lifespan);
        if let Some(progress) = animal.gestation {
            let fraction = progress as f64 / self.cfg.life.gestation_ticks as f64;
            speed = (speed * (1.0 - fraction.min(1.0) / 2.0)).max(0.1 * max_speed);
        }
        speed
    }

    /// Whether a female is ready to conceive.
    pub fn is_receptive(&self, animal: &Animal) -> bool {
        animal.sex == Sex::Female
            && !animal.is_pregnant()
            && animal.energy >= self.cfg.life.mate_min_energy
            && self.life_stage(animal) == LifeStage::Fertile
    }

    /// Whether two animals could mate, ignoring distance.
    pub fn is_compatible(&self, a: &Animal, b: &Animal) -> bool {
        if a.id == b.id || a.species != b.species || a.sex == b.sex {
            return false;
        }
        let (male, female) = if a.sex == Sex::Male { (a, b) } else { (b, a) };
        self.life_stage(male) == LifeStage::Fertile && self.is_receptive(female)
    }

    pub fn can_mate(&self, a: &Animal, b: &Animal) -> bool {
        self.is_compatible(a, b) && a.pos.distance(&b.pos) <= self.cfg.life.mate_radius
    }

    pub fn can_pounce(&self, predator: &Animal, prey: &Animal) -> bool {
        predator.species == Species::Predator
            && prey.species == Species::Prey
            && predator.is_alive()
            && prey.is_alive()
            && predator.pos.distance(&prey.pos) <= self.cfg.interaction.catch_radius
    }

    pub fn can_graze(&self, prey: &Animal, patch_center: &Position) -> bool {
        prey.species == Species::Prey
            && prey.pos.distance(patch_center) <= self.cfg.interaction.graze_radius
    }

    pub fn should_flee(&self, prey: &Animal, predator: &Animal) -> bool {
        prey.species == Species::Prey
            && predator.species == Species::Predator
            && predator.is_alive()
            && prey.pos.distance(&predator.pos) <= self.cfg.interaction.flee_radius
    }

    /// Energy a predator gains from eating `prey`, or a prey from grass.
    pub fn meal_energy(&self, eater: &Animal, prey: Option<&Animal>) -> f64 {
        let meal = self.species(eater.species).meal_energy;
        match prey {
            Some(prey) => meal + self.cfg.interaction.carcass_energy_fraction * prey.energy,
            None => meal,
        }
    }

    /// Number of offspring for a litter, given a standard normal sample.
    pub fn litter_size(&self, species: Species, std_normal: f64) -> usize {
        let size = self.species(species).litter_size * (1.0 + 0.2 * std_normal);
        size.round().max(0.0) as usize
    }
}

/// Speed multiplier over a lifetime: ramps up to 1 at mid-life, then declines.
pub fn age_speed_factor(life_fraction: f64) -> f64 {
    let x = life_fraction.clamp(0.0, 1.0);
    let y = if x < 0.5 {
        1.0 - (2.0 * x - 1.0).powi(4)
    } else {
        let u = x - 0.5;
        5.1 * u.powi(3) - 6.4 * u.powi(2) + 0.6 * u + 1.0
    };
    y.max(0.1)
}

/// Move from `from` towards `to` by at most `distance`, never overshooting.
pub fn step_toward(from: &Position, to: &Position, distance: f64) -> Position {
    let total = from.distance(to);
    if total <= distance || total == 0.0 {
        return *to;
    }
    let ratio = distance / total;
    Position::new(
        from.x + (to.x - from.x) * ratio,
        from.y + (to.y - from.y) * ratio,
    )
}

/// Move from `from` directly away from `threat` by `distance`.
pub fn step_away(from: &Position, threat: &Position, distance: f64) -> Position {
    let total = from.distance(threat);
    if total == 0.0 {
        return Position::new(from.x + distance, from.y);
    }
    let ratio = distance / total;
    Position::new(
        from.x + (from.x - threat.x) * ratio,
        from.y + (from.y - threat.y) * ratio,
    )
}
