use crate::config::{Activation, Config};
use crate::model::{
    Animal, Census, Death, Events, Field, GrassPatch, LifeStage, PatchKind, Position, Sex,
    Species, State, Target,
};
use crate::rules::{self, Rules};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Normal, StandardNormal, Uniform};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Radius within which a wandering animal picks its next waypoint.
const WANDER_RADIUS: f64 = 3.0;

/// Simulation engine.
///
/// Holds the configuration, current state, and random number generator,
/// and provides methods to initialize, run, save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    state: State,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a random initial state.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let mut rng = match cfg.init.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let (width, height) = (cfg.world.width, cfg.world.height);
        let rock_dist = Bernoulli::new(cfg.world.rocky_fraction)?;
        let patches = (0..width * height)
            .map(|_| {
                let kind = if rock_dist.sample(&mut rng) {
                    PatchKind::Rock
                } else {
                    PatchKind::Grass
                };
                GrassPatch::new(kind, cfg.world.grass_regrow_ticks)
            })
            .collect();
        let field = Field::new(width, height, patches).context("failed to build field")?;

        let x_dist = Uniform::new_inclusive(0.0, (width - 1) as f64)?;
        let y_dist = Uniform::new_inclusive(0.0, (height - 1) as f64)?;
        let age_dist = Uniform::new_inclusive(cfg.init.init_age_min, cfg.init.init_age_max)?;

        let seed_groups = [
            (Species::Predator, Sex::Male, cfg.init.n_predator_male),
            (Species::Predator, Sex::Female, cfg.init.n_predator_female),
            (Species::Prey, Sex::Male, cfg.init.n_prey_male),
            (Species::Prey, Sex::Female, cfg.init.n_prey_female),
        ];

        let mut next_id = 0;
        let mut animals = Vec::with_capacity(cfg.n_animals_init());
        for (species, sex, n_animals) in seed_groups {
            for _ in 0..n_animals {
                let pos = Position::new(x_dist.sample(&mut rng), y_dist.sample(&mut rng));
                let age = age_dist.sample(&mut rng);
                let animal = spawn(&cfg, &mut rng, &mut next_id, species, sex, age, pos)
                    .context("failed to spawn seed animal")?;
                animals.push(animal);
            }
        }

        let state = State {
            tick: 0,
            field,
            animals,
            next_id,
            events: Events::default(),
        };

        Ok(Self { cfg, state, rng })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_extinct(&self) -> bool {
        self.state.n_alive() == 0
    }

    /// Perform the simulation and save the resulting censuses to a binary file.
    ///
    /// Stops early once no animal is left alive.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        for i_save in 0..self.cfg.output.saves_per_file {
            for _ in 0..self.cfg.output.steps_per_save {
                if self.is_extinct() {
                    break;
                }
                self.perform_step().context("failed to perform step")?;
            }

            let census = Census::new(&self.state);
            encode::write(&mut writer, &census).context("failed to serialize census")?;
            self.state.events = Events::default();

            let progress = 100.0 * (i_save + 1) as f64 / self.cfg.output.saves_per_file as f64;
            log::info!(
                "completed {progress:06.2}% (tick {}, predators {}, prey {}, grass {:.2})",
                census.tick,
                census.n_predator(),
                census.n_prey(),
                census.grass_cover
            );

            if census.extinct() {
                log::info!("population extinct at tick {}", census.tick);
                break;
            }
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    /// Advance the simulation by one tick.
    pub fn perform_step(&mut self) -> Result<()> {
        self.state.tick += 1;

        // Regrow grass before anyone eats.
        self.state.field.tick();

        let order = self.activation_order();

        // Offspring join after the loop and first act next tick.
        let mut newborns = Vec::new();
        for i_animal in order {
            step_animal(
                &self.cfg,
                &mut self.state,
                &mut self.rng,
                i_animal,
                &mut newborns,
            )
            .context("failed to step animal")?;
        }

        // Remove the dead before the next tick's decisions.
        self.state.animals.retain(Animal::is_alive);

        self.state.events.births += newborns.len();
        self.state.animals.extend(newborns);

        Ok(())
    }

    fn activation_order(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.state.animals.len()).collect();
        match self.cfg.world.activation {
            Activation::Random => order.shuffle(&mut self.rng),
            Activation::Sequential => order.sort_by_key(|&i_animal| self.state.animals[i_animal].id),
        }
        order
    }
}

fn spawn(
    cfg: &Config,
    rng: &mut ChaCha12Rng,
    next_id: &mut u64,
    species: Species,
    sex: Sex,
    age: f64,
    pos: Position,
) -> Result<Animal> {
    let species_cfg = Rules::new(cfg).species(species);
    let lifespan_dist = Normal::new(species_cfg.lifespan, 0.2 * species_cfg.lifespan)?;
    let lifespan = lifespan_dist.sample(rng).max(0.0);

    let id = *next_id;
    *next_id += 1;

    Ok(Animal {
        id,
        species,
        sex,
        age,
        energy: species_cfg.init_energy,
        pos,
        lifespan,
        target: None,
        gestation: None,
        death: None,
    })
}

fn step_animal(
    cfg: &Config,
    state: &mut State,
    rng: &mut ChaCha12Rng,
    i_animal: usize,
    newborns: &mut Vec<Animal>,
) -> Result<()> {
    if !state.animals[i_animal].is_alive() {
        return Ok(());
    }

    age_and_metabolize(cfg, state, i_animal);
    if !state.animals[i_animal].is_alive() {
        return Ok(());
    }

    advance_gestation(cfg, state, rng, i_animal, newborns)
        .context("failed to advance gestation")?;

    let rules = Rules::new(cfg);
    let animal = &state.animals[i_animal];
    let species = animal.species;
    let radius = rules.species(species).perception_radius;

    if species == Species::Prey {
        let threat = nearest_animal(state, i_animal, cfg.interaction.flee_radius, |other| {
            rules.should_flee(animal, other)
        });
        if let Some(i_threat) = threat {
            flee(cfg, state, i_animal, i_threat);
            return Ok(());
        }
    }

    if rules.is_hungry(animal) {
        let fed = match species {
            Species::Prey => graze(cfg, state, i_animal),
            Species::Predator => hunt(cfg, state, rng, i_animal)?,
        };
        if fed {
            return Ok(());
        }
    }

    let animal = &state.animals[i_animal];
    if animal.sex == Sex::Male && rules.life_stage(animal) == LifeStage::Fertile {
        let mate = nearest_animal(state, i_animal, radius, |other| {
            rules.is_compatible(animal, other)
        });
        if let Some(i_mate) = mate {
            court(cfg, state, i_animal, i_mate);
            return Ok(());
        }
    }

    wander(cfg, state, rng, i_animal)?;

    Ok(())
}

fn age_and_metabolize(cfg: &Config, state: &mut State, i_animal: usize) {
    let life = &cfg.life;
    let animal = &mut state.animals[i_animal];

    animal.age += life.age_per_tick;

    let mut decay = life.energy_decay;
    if animal.is_pregnant() {
        decay += life.energy_decay * life.gestation_cost_factor;
    }
    animal.energy = (animal.energy - decay).max(0.0);

    let cause = if animal.energy <= 0.0 {
        Death::Starvation
    } else if animal.age > animal.lifespan {
        Death::OldAge
    } else {
        return;
    };
    animal.kill(cause);
    state.events.record_death(cause);
    match cause {
        Death::Starvation => log::debug!("{:?} {} starved to death", animal.species, animal.id),
        _ => log::debug!("{:?} {} aged out", animal.species, animal.id),
    }
}

fn advance_gestation(
    cfg: &Config,
    state: &mut State,
    rng: &mut ChaCha12Rng,
    i_animal: usize,
    newborns: &mut Vec<Animal>,
) -> Result<()> {
    let animal = &mut state.animals[i_animal];
    let Some(progress) = animal.gestation else {
        return Ok(());
    };

    let progress = progress + 1;
    if progress < cfg.life.gestation_ticks {
        animal.gestation = Some(progress);
        return Ok(());
    }
    animal.gestation = None;

    let (species, pos, id) = (animal.species, animal.pos, animal.id);
    let n_babies = Rules::new(cfg).litter_size(species, rng.sample(StandardNormal));
    for _ in 0..n_babies {
        let sex = if rng.random_bool(0.5) {
            Sex::Male
        } else {
            Sex::Female
        };
        let baby = spawn(cfg, rng, &mut state.next_id, species, sex, 0.0, pos)
            .context("failed to spawn offspring")?;
        newborns.push(baby);
    }
    log::debug!("{species:?} {id} gave birth to {n_babies} babies");

    Ok(())
}

/// Nearest live animal within `radius` matching `accept`, lowest id on ties.
fn nearest_animal<F>(state: &State, i_animal: usize, radius: f64, accept: F) -> Option<usize>
where
    F: Fn(&Animal) -> bool,
{
    let pos = state.animals[i_animal].pos;
    let mut best: Option<(usize, f64, u64)> = None;
    for (i_other, other) in state.animals.iter().enumerate() {
        if i_other == i_animal || !other.is_alive() || !accept(other) {
            continue;
        }
        let dist = pos.distance(&other.pos);
        if dist > radius {
            continue;
        }
        let closer = best.is_none_or(|(_, best_dist, best_id)| {
            dist < best_dist || (dist == best_dist && other.id < best_id)
        });
        if closer {
            best = Some((i_other, dist, other.id));
        }
    }
    best.map(|(i_other, _, _)| i_other)
}

fn move_to(state: &mut State, i_animal: usize, dest: Position) {
    let dest = state.field.clamp(dest);
    state.animals[i_animal].pos = dest;
}

fn flee(cfg: &Config, state: &mut State, i_animal: usize, i_threat: usize) {
    let speed = Rules::new(cfg).speed(&state.animals[i_animal]);
    let threat = state.animals[i_threat].pos;
    let dest = rules::step_away(&state.animals[i_animal].pos, &threat, speed);
    state.animals[i_animal].target = None;
    move_to(state, i_animal, dest);
}

/// Eat grass in reach or head for the nearest edible patch.
///
/// Returns `false` when no edible patch is in sight.
fn graze(cfg: &Config, state: &mut State, i_animal: usize) -> bool {
    let rules = Rules::new(cfg);
    let prey = &state.animals[i_animal];
    let radius = rules.species(prey.species).perception_radius;
    let Some((i_patch, _)) = state.field.nearest_edible(&prey.pos, radius) else {
        return false;
    };
    let center = state.field.center(i_patch);

    if rules.can_graze(prey, &center) {
        let meal = rules.meal_energy(prey, None);
        if state.field.patch_mut(i_patch).consume().is_some() {
            let prey = &mut state.animals[i_animal];
            prey.energy = (prey.energy + meal).min(cfg.life.max_energy);
            prey.target = None;
        }
    } else {
        let dest = rules::step_toward(&prey.pos, &center, rules.speed(prey));
        state.animals[i_animal].target = Some(Target::Patch(i_patch));
        move_to(state, i_animal, dest);
    }
    true
}

/// Pounce on prey in reach or chase the nearest one.
///
/// Returns `false` when no prey is in sight.
fn hunt(cfg: &Config, state: &mut State, rng: &mut ChaCha12Rng, i_animal: usize) -> Result<bool> {
    let rules = Rules::new(cfg);
    let predator = &state.animals[i_animal];
    let radius = rules.species(predator.species).perception_radius;
    let Some(i_prey) = nearest_animal(state, i_animal, radius, |other| {
        other.species == Species::Prey
    }) else {
        return Ok(false);
    };
    let prey = &state.animals[i_prey];

    if rules.can_pounce(predator, prey) {
        let pounce_dist = Bernoulli::new(cfg.interaction.pounce_success_prob)?;
        if pounce_dist.sample(rng) {
            let meal = rules.meal_energy(predator, Some(prey));
            log::debug!("Predator {} ate Prey {}", predator.id, prey.id);

            state.animals[i_prey].kill(Death::Predation);
            state.events.record_death(Death::Predation);

            let predator = &mut state.animals[i_animal];
            predator.energy = (predator.energy + meal).min(cfg.life.max_energy);
            predator.target = None;
        } else {
            log::debug!("Predator {} missed Prey {}", predator.id, prey.id);
        }
    } else {
        let prey_id = prey.id;
        let dest = rules::step_toward(&predator.pos, &prey.pos, rules.speed(predator));
        state.animals[i_animal].target = Some(Target::Animal(prey_id));
        move_to(state, i_animal, dest);
    }
    Ok(true)
}

/// Mate with a compatible female in reach or approach her.
fn court(cfg: &Config, state: &mut State, i_animal: usize, i_mate: usize) {
    let rules = Rules::new(cfg);
    let male = &state.animals[i_animal];
    let female = &state.animals[i_mate];

    if rules.can_mate(male, female) {
        log::debug!("{:?} {} mated with {}", male.species, male.id, female.id);
        state.animals[i_mate].gestation = Some(0);
        state.animals[i_animal].target = None;
    } else {
        let female_id = female.id;
        let dest = rules::step_toward(&male.pos, &female.pos, rules.speed(male));
        state.animals[i_animal].target = Some(Target::Animal(female_id));
        move_to(state, i_animal, dest);
    }
}

/// Walk towards a random waypoint nearby, picking a new one once reached.
fn wander(cfg: &Config, state: &mut State, rng: &mut ChaCha12Rng, i_animal: usize) -> Result<()> {
    let rules = Rules::new(cfg);
    let animal = &state.animals[i_animal];
    let pos = animal.pos;

    let waypoint = match animal.target {
        Some(Target::Point(point)) if point != pos => point,
        _ => {
            let offset_dist = Uniform::new_inclusive(-WANDER_RADIUS, WANDER_RADIUS)?;
            let point = Position::new(
                pos.x + offset_dist.sample(rng),
                pos.y + offset_dist.sample(rng),
            );
            state.field.clamp(point)
        }
    };

    let dest = rules::step_toward(&pos, &waypoint, rules.speed(animal));
    state.animals[i_animal].target = Some(Target::Point(waypoint));
    move_to(state, i_animal, dest);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_field(cfg: &Config) -> Field {
        let patches = (0..cfg.world.width * cfg.world.height)
            .map(|_| GrassPatch::new(PatchKind::Grass, cfg.world.grass_regrow_ticks))
            .collect();
        Field::new(cfg.world.width, cfg.world.height, patches).unwrap()
    }

    fn test_cfg() -> Config {
        let mut cfg = Config::default();
        cfg.world.width = 20;
        cfg.world.height = 20;
        cfg.world.rocky_fraction = 0.0;
        cfg.init.seed = Some(7);
        cfg
    }

    fn animal(id: u64, species: Species, sex: Sex, pos: Position) -> Animal {
        Animal {
            id,
            species,
            sex,
            age: 2.5,
            energy: 50.0,
            pos,
            lifespan: 10.0,
            target: None,
            gestation: None,
            death: None,
        }
    }

    fn engine_with(cfg: Config, animals: Vec<Animal>) -> Engine {
        let field = open_field(&cfg);
        let next_id = animals.iter().map(|a| a.id + 1).max().unwrap_or(0);
        let state = State {
            tick: 0,
            field,
            animals,
            next_id,
            events: Events::default(),
        };
        Engine {
            cfg,
            state,
            rng: ChaCha12Rng::seed_from_u64(11),
        }
    }

    #[test]
    fn prey_on_edible_patch_grazes() {
        let cfg = test_cfg();
        let pos = Position::new(5.0, 5.0);
        let mut prey = animal(0, Species::Prey, Sex::Female, pos);
        prey.energy = 10.0;
        let mut engine = engine_with(cfg.clone(), vec![prey]);
        let i_patch = engine.state.field.cell_of(&pos);

        engine.perform_step().unwrap();

        let prey = &engine.state.animals[0];
        let expected = 10.0 - cfg.life.energy_decay + cfg.prey.meal_energy;
        assert!((prey.energy - expected).abs() < 1e-9);
        assert!(engine.state.field.patches()[i_patch].is_eaten());
        assert_eq!(engine.state.field.n_edible(), 20 * 20 - 1);
    }

    #[test]
    fn predator_out_of_reach_closes_in() {
        let cfg = test_cfg();
        let tiger = animal(0, Species::Predator, Sex::Male, Position::new(8.0, 10.0));
        let prey = animal(1, Species::Prey, Sex::Female, Position::new(9.5, 10.0));
        let before = tiger.pos.distance(&prey.pos);
        assert!(before > cfg.interaction.catch_radius);

        let mut engine = engine_with(cfg, vec![tiger, prey]);
        engine.perform_step().unwrap();

        assert_eq!(engine.state.animals.len(), 2);
        assert_eq!(engine.state.events.eaten, 0);
        let tiger = &engine.state.animals[0];
        let prey = &engine.state.animals[1];
        assert!(tiger.pos.distance(&prey.pos) < before);
        assert_eq!(tiger.target, Some(Target::Animal(1)));
    }

    #[test]
    fn predator_in_reach_eats_prey() {
        let cfg = test_cfg();
        let tiger = animal(0, Species::Predator, Sex::Male, Position::new(8.0, 10.0));
        let mut prey = animal(1, Species::Prey, Sex::Female, Position::new(8.3, 10.0));
        prey.energy = 20.0;
        let mut cfg = cfg;
        cfg.world.activation = Activation::Sequential;

        let mut engine = engine_with(cfg.clone(), vec![tiger, prey]);
        engine.perform_step().unwrap();

        assert_eq!(engine.state.animals.len(), 1);
        assert_eq!(engine.state.events.eaten, 1);
        let tiger = &engine.state.animals[0];
        let expected = 50.0 - cfg.life.energy_decay + cfg.predator.meal_energy + 0.25 * 20.0;
        assert!((tiger.energy - expected).abs() < 1e-9);
    }

    #[test]
    fn prey_flees_from_nearby_predator() {
        let mut cfg = test_cfg();
        cfg.world.activation = Activation::Sequential;
        let prey = animal(0, Species::Prey, Sex::Female, Position::new(10.0, 10.0));
        let tiger = animal(1, Species::Predator, Sex::Male, Position::new(11.5, 10.0));
        let threat = tiger.pos;
        let before = prey.pos.distance(&threat);
        assert!(before <= cfg.interaction.flee_radius);

        let mut engine = engine_with(cfg, vec![prey, tiger]);
        engine.perform_step().unwrap();

        let prey = &engine.state.animals[0];
        assert!(prey.pos.distance(&threat) > before);
        assert!(prey.pos.x < 10.0);
        assert_eq!(prey.pos.y, 10.0);
        assert_eq!(prey.target, None);
    }

    #[test]
    fn hungry_prey_without_grass_wanders() {
        let cfg = test_cfg();
        let mut prey = animal(0, Species::Prey, Sex::Female, Position::new(10.0, 10.0));
        prey.energy = 10.0;

        let mut engine = engine_with(cfg.clone(), vec![prey]);
        for i_patch in 0..cfg.world.width * cfg.world.height {
            engine.state.field.patch_mut(i_patch).consume().unwrap();
        }
        engine.perform_step().unwrap();

        let prey = &engine.state.animals[0];
        assert!(matches!(prey.target, Some(Target::Point(_))));
        assert_eq!(engine.state.field.clamp(prey.pos), prey.pos);
        assert!((prey.energy - (10.0 - cfg.life.energy_decay)).abs() < 1e-9);
        assert_eq!(engine.state.field.n_edible(), 0);
    }

    #[test]
    fn wander_waypoint_stays_within_wander_radius() {
        let cfg = test_cfg();
        let start = Position::new(10.0, 10.0);
        let mut prey = animal(0, Species::Prey, Sex::Female, start);
        prey.energy = 90.0;

        let mut engine = engine_with(cfg.clone(), vec![prey]);
        engine.perform_step().unwrap();

        let prey = &engine.state.animals[0];
        let Some(Target::Point(waypoint)) = prey.target else {
            panic!("expected a waypoint, got {:?}", prey.target);
        };
        assert!((waypoint.x - start.x).abs() <= WANDER_RADIUS);
        assert!((waypoint.y - start.y).abs() <= WANDER_RADIUS);
        let speed = Rules::new(&cfg).speed(prey);
        assert!(prey.pos.distance(&start) <= speed + 1e-9);
    }

    #[test]
    fn well_fed_predator_ignores_prey_in_reach() {
        let mut cfg = test_cfg();
        cfg.world.activation = Activation::Sequential;
        let mut tiger = animal(0, Species::Predator, Sex::Male, Position::new(8.0, 10.0));
        tiger.energy = 90.0;
        let prey = animal(1, Species::Prey, Sex::Female, Position::new(8.3, 10.0));
        assert!(tiger.energy >= cfg.life.hunger_threshold);

        let mut engine = engine_with(cfg.clone(), vec![tiger, prey]);
        engine.perform_step().unwrap();

        assert_eq!(engine.state.animals.len(), 2);
        assert_eq!(engine.state.events.eaten, 0);
        let tiger = &engine.state.animals[0];
        assert!((tiger.energy - (90.0 - cfg.life.energy_decay)).abs() < 1e-9);
    }

    #[test]
    fn missed_pounce_leaves_prey_alive() {
        let mut cfg = test_cfg();
        cfg.interaction.pounce_success_prob = 0.0;
        cfg.world.activation = Activation::Sequential;
        let tiger = animal(0, Species::Predator, Sex::Male, Position::new(8.0, 10.0));
        let prey = animal(1, Species::Prey, Sex::Female, Position::new(8.3, 10.0));

        let mut engine = engine_with(cfg, vec![tiger, prey]);
        engine.perform_step().unwrap();

        assert_eq!(engine.state.animals.len(), 2);
        assert_eq!(engine.state.events.eaten, 0);
    }

    #[test]
    fn adjacent_fertile_pair_mates() {
        let mut cfg = test_cfg();
        cfg.world.activation = Activation::Sequential;
        let mut male = animal(0, Species::Prey, Sex::Male, Position::new(5.0, 5.0));
        let mut female = animal(1, Species::Prey, Sex::Female, Position::new(5.2, 5.0));
        male.energy = 90.0;
        female.energy = 90.0;

        let mut engine = engine_with(cfg, vec![male, female]);
        engine.perform_step().unwrap();

        // Conceived by the male, then one tick older on her own turn.
        assert_eq!(engine.state.animals[1].gestation, Some(1));
    }

    #[test]
    fn juvenile_pair_does_not_mate() {
        let mut cfg = test_cfg();
        cfg.world.activation = Activation::Sequential;
        let mut male = animal(0, Species::Prey, Sex::Male, Position::new(5.0, 5.0));
        let mut female = animal(1, Species::Prey, Sex::Female, Position::new(5.2, 5.0));
        for a in [&mut male, &mut female] {
            a.energy = 90.0;
            a.age = 0.2;
        }

        let mut engine = engine_with(cfg.clone(), vec![male, female]);
        {
            let rules = Rules::new(&cfg);
            assert_eq!(rules.life_stage(&engine.state.animals[0]), LifeStage::Juvenile);
        }
        engine.perform_step().unwrap();

        assert!(!engine.state.animals[1].is_pregnant());
    }

    #[test]
    fn full_term_pregnancy_gives_birth() {
        let cfg = test_cfg();
        let pos = Position::new(5.0, 5.0);
        let mut mother = animal(0, Species::Prey, Sex::Female, pos);
        mother.energy = 90.0;
        mother.gestation = Some(cfg.life.gestation_ticks - 1);

        let mut engine = engine_with(cfg.clone(), vec![mother]);
        engine.perform_step().unwrap();

        let state = &engine.state;
        assert!(!state.animals[0].is_pregnant());
        assert_eq!(state.events.births, state.animals.len() - 1);
        for baby in &state.animals[1..] {
            assert_eq!(baby.age, 0.0);
            assert_eq!(baby.pos, pos);
            assert_eq!(baby.energy, cfg.prey.init_energy);
            assert!(baby.id > 0);
        }
    }

    #[test]
    fn starving_animal_is_removed_in_the_same_tick() {
        let cfg = test_cfg();
        let mut tiger = animal(0, Species::Predator, Sex::Male, Position::new(5.0, 5.0));
        tiger.energy = cfg.life.energy_decay / 2.0;

        let mut engine = engine_with(cfg, vec![tiger]);
        engine.perform_step().unwrap();

        assert!(engine.state.animals.is_empty());
        assert_eq!(engine.state.events.starved, 1);
    }

    #[test]
    fn old_animal_is_removed() {
        let cfg = test_cfg();
        let mut prey = animal(0, Species::Prey, Sex::Male, Position::new(5.0, 5.0));
        prey.age = prey.lifespan;

        let mut engine = engine_with(cfg, vec![prey]);
        engine.perform_step().unwrap();

        assert!(engine.state.animals.is_empty());
        assert_eq!(engine.state.events.aged_out, 1);
    }

    #[test]
    fn predators_alone_go_extinct() {
        let mut cfg = test_cfg();
        cfg.init.n_prey_male = 0;
        cfg.init.n_prey_female = 0;
        cfg.init.n_predator_male = 10;
        cfg.init.n_predator_female = 10;
        // Without prey every predator starves long before it could age out.
        let depletion = (cfg.predator.init_energy / cfg.life.energy_decay).ceil() as usize;
        let bound = depletion + 2;

        let mut engine = Engine::generate_initial_condition(cfg).unwrap();
        for _ in 0..bound {
            engine.perform_step().unwrap();
        }
        assert!(engine.is_extinct());
    }

    #[test]
    fn invariants_hold_over_a_seeded_run() {
        let cfg = test_cfg();
        let regrow = cfg.world.grass_regrow_ticks;
        let mut engine = Engine::generate_initial_condition(cfg).unwrap();

        for _ in 0..300 {
            let before: Vec<u32> = engine
                .state
                .field
                .patches()
                .iter()
                .map(GrassPatch::regrowth_timer)
                .collect();

            engine.perform_step().unwrap();

            for (patch, &timer) in engine.state.field.patches().iter().zip(&before) {
                let after = patch.regrowth_timer();
                assert!(after <= regrow);
                assert!(after == timer.saturating_sub(1) || after == regrow);
            }
            for animal in &engine.state.animals {
                assert!(animal.is_alive());
                assert!(animal.energy >= 0.0);
                let (w, h) = (engine.state.field.width(), engine.state.field.height());
                assert!(animal.pos.x >= 0.0 && animal.pos.x <= (w - 1) as f64);
                assert!(animal.pos.y >= 0.0 && animal.pos.y <= (h - 1) as f64);
            }
        }
    }

    #[test]
    fn same_seed_reproduces_the_run() {
        let run = || {
            let mut engine = Engine::generate_initial_condition(test_cfg()).unwrap();
            (0..100)
                .map(|_| {
                    engine.perform_step().unwrap();
                    Census::new(&engine.state)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn checkpoint_resumes_identically() {
        let dir = std::env::temp_dir().join(format!("savannah-ckpt-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("checkpoint.msgpack");

        let mut engine = Engine::generate_initial_condition(test_cfg()).unwrap();
        for _ in 0..20 {
            engine.perform_step().unwrap();
        }
        engine.save_checkpoint(&file).unwrap();
        let mut resumed = Engine::load_checkpoint(&file).unwrap();

        for _ in 0..20 {
            engine.perform_step().unwrap();
            resumed.perform_step().unwrap();
        }
        assert_eq!(Census::new(&engine.state), Census::new(&resumed.state));
        assert_eq!(resumed.cfg(), engine.cfg());

        std::fs::remove_dir_all(&dir).ok();
    }
}
