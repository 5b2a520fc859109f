use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub world: WorldConfig,
    pub life: LifeConfig,
    pub interaction: InteractionConfig,
    pub predator: SpeciesConfig,
    pub prey: SpeciesConfig,
    pub init: InitConfig,
    pub output: OutputConfig,
}

/// Field geometry and grass dynamics.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Number of patch columns.
    pub width: usize,
    /// Number of patch rows.
    pub height: usize,
    /// Fraction of patches that are rock and never carry grass.
    pub rocky_fraction: f64,
    /// Ticks an eaten patch needs to become edible again.
    pub grass_regrow_ticks: u32,
    /// Order in which animals act within a tick.
    pub activation: Activation,
}

/// Activation order policy.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Seeded shuffle of the live animals every tick.
    Random,
    /// Ascending animal id.
    Sequential,
}

/// Ageing, metabolism and reproduction, shared by both species.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LifeConfig {
    /// Years added to every animal's age each tick.
    pub age_per_tick: f64,
    /// Age at which an animal becomes fertile.
    pub min_fertile_age: f64,
    /// Age after which an animal is senescent.
    pub max_fertile_age: f64,
    /// Energy burned per tick.
    pub energy_decay: f64,
    /// Energy ceiling.
    pub max_energy: f64,
    /// Below this energy an animal looks for food.
    pub hunger_threshold: f64,
    /// Minimum energy a female needs to conceive.
    pub mate_min_energy: f64,
    /// Maximum distance between mating partners.
    pub mate_radius: f64,
    /// Length of a pregnancy in ticks.
    pub gestation_ticks: u32,
    /// Extra decay paid while pregnant, as a multiple of `energy_decay`.
    pub gestation_cost_factor: f64,
}

/// Radii and payoffs of feeding.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    /// Maximum predator-prey distance at which a pounce may succeed.
    pub catch_radius: f64,
    /// Maximum prey-patch distance at which grass can be eaten.
    pub graze_radius: f64,
    /// Prey flee from predators closer than this.
    pub flee_radius: f64,
    /// Probability that a pounce within catch radius kills.
    pub pounce_success_prob: f64,
    /// Fraction of the prey's energy passed to the predator.
    pub carcass_energy_fraction: f64,
}

/// Per-species parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    /// Mean lifespan in years.
    pub lifespan: f64,
    /// Speed at the peak of life, in cells per tick.
    pub max_speed: f64,
    /// Radius within which food and mates are noticed.
    pub perception_radius: f64,
    /// Energy of newborn and seed animals.
    pub init_energy: f64,
    /// Energy gained per meal.
    pub meal_energy: f64,
    /// Mean number of offspring per birth.
    pub litter_size: f64,
}

/// Seed population.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    pub n_predator_male: usize,
    pub n_predator_female: usize,
    pub n_prey_male: usize,
    pub n_prey_female: usize,
    /// Seed animals get a uniform random age in `init_age_min..=init_age_max`.
    pub init_age_min: f64,
    pub init_age_max: f64,
    /// Random seed; drawn from the OS when absent.
    pub seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of ticks between censuses.
    pub steps_per_save: usize,
    /// Number of censuses written per trajectory file.
    pub saves_per_file: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world: WorldConfig {
                width: 80,
                height: 80,
                rocky_fraction: 0.02,
                grass_regrow_ticks: 400,
                activation: Activation::Random,
            },
            life: LifeConfig {
                age_per_tick: 0.005,
                min_fertile_age: 1.0,
                max_fertile_age: 8.0,
                energy_decay: 0.3,
                max_energy: 100.0,
                hunger_threshold: 80.0,
                mate_min_energy: 50.0,
                mate_radius: 0.5,
                gestation_ticks: 180,
                gestation_cost_factor: 1.0 / 3.0,
            },
            interaction: InteractionConfig {
                catch_radius: 0.5,
                graze_radius: 0.5,
                flee_radius: 2.0,
                pounce_success_prob: 1.0,
                carcass_energy_fraction: 0.25,
            },
            predator: SpeciesConfig {
                lifespan: 17.0,
                max_speed: 2.0,
                perception_radius: 9.0,
                init_energy: 50.0,
                meal_energy: 40.0,
                litter_size: 2.0,
            },
            prey: SpeciesConfig {
                lifespan: 9.0,
                max_speed: 1.0,
                perception_radius: 2.0,
                init_energy: 10.0,
                meal_energy: 10.0,
                litter_size: 3.5,
            },
            init: InitConfig {
                n_predator_male: 5,
                n_predator_female: 5,
                n_prey_male: 30,
                n_prey_female: 30,
                init_age_min: 1.0,
                init_age_max: 5.0,
                seed: None,
            },
            output: OutputConfig {
                steps_per_save: 10,
                saves_per_file: 100,
            },
        }
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Write the configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let contents = toml::to_string(self).context("failed to serialize config")?;
        fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }

    /// Total number of seed animals.
    pub fn n_animals_init(&self) -> usize {
        self.init.n_predator_male
            + self.init.n_predator_female
            + self.init.n_prey_male
            + self.init.n_prey_female
    }

    pub fn validate(&self) -> Result<()> {
        let world = &self.world;
        check_num(world.width, 1..=1_000).context("invalid field width")?;
        check_num(world.height, 1..=1_000).context("invalid field height")?;
        check_num(world.rocky_fraction, 0.0..=1.0).context("invalid rocky fraction")?;
        check_num(world.grass_regrow_ticks, 0..=1_000_000)
            .context("invalid grass regrowth ticks")?;

        let life = &self.life;
        check_num(life.age_per_tick, 0.0..=1.0).context("invalid age per tick")?;
        check_num(life.min_fertile_age, 0.0..=1_000.0).context("invalid min fertile age")?;
        check_num(life.max_fertile_age, life.min_fertile_age..=1_000.0)
            .context("invalid max fertile age")?;
        check_num(life.max_energy, 1.0..=1e6).context("invalid max energy")?;
        check_num(life.energy_decay, 0.0..=life.max_energy).context("invalid energy decay")?;
        check_num(life.hunger_threshold, 0.0..=life.max_energy)
            .context("invalid hunger threshold")?;
        check_num(life.mate_min_energy, 0.0..=life.max_energy)
            .context("invalid mate min energy")?;
        check_num(life.mate_radius, 0.0..=1_000.0).context("invalid mate radius")?;
        check_num(life.gestation_ticks, 1..=1_000_000).context("invalid gestation ticks")?;
        check_num(life.gestation_cost_factor, 0.0..=10.0)
            .context("invalid gestation cost factor")?;

        let interaction = &self.interaction;
        check_num(interaction.catch_radius, 0.0..=1_000.0).context("invalid catch radius")?;
        check_num(interaction.graze_radius, 0.0..=1_000.0).context("invalid graze radius")?;
        check_num(interaction.flee_radius, 0.0..=1_000.0).context("invalid flee radius")?;
        check_num(interaction.pounce_success_prob, 0.0..=1.0)
            .context("invalid pounce success probability")?;
        check_num(interaction.carcass_energy_fraction, 0.0..=1.0)
            .context("invalid carcass energy fraction")?;

        self.predator
            .validate(life.max_energy)
            .context("invalid predator parameters")?;
        self.prey
            .validate(life.max_energy)
            .context("invalid prey parameters")?;

        check_num(self.n_animals_init(), 0..=100_000).context("invalid initial population")?;
        check_num(self.init.init_age_min, 0.0..=1_000.0).context("invalid min initial age")?;
        check_num(self.init.init_age_max, self.init.init_age_min..=1_000.0)
            .context("invalid max initial age")?;

        check_num(self.output.steps_per_save, 1..=100_000)
            .context("invalid number of steps per save")?;
        check_num(self.output.saves_per_file, 1..=100_000)
            .context("invalid number of saves per file")?;

        Ok(())
    }
}

impl SpeciesConfig {
    fn validate(&self, max_energy: f64) -> Result<()> {
        check_num(self.lifespan, 0.0..=1_000.0).context("invalid lifespan")?;
        check_num(self.max_speed, 0.0..=1_000.0).context("invalid max speed")?;
        check_num(self.perception_radius, 0.0..=1_000.0).context("invalid perception radius")?;
        check_num(self.init_energy, 0.0..=max_energy).context("invalid initial energy")?;
        check_num(self.meal_energy, 0.0..=max_energy).context("invalid meal energy")?;
        check_num(self.litter_size, 0.0..=100.0).context("invalid litter size")?;
        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
