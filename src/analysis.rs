use crate::model::{Census, Events, Species};
use crate::stats::{Accumulator, TimeSeries};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde_value::Value;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

/// Observable computed from a stream of censuses.
pub trait Obs {
    fn name(&self) -> &'static str;
    fn update(&mut self, census: &Census);
    fn report(&self) -> Result<Value>;
}

pub struct Population {
    species: Species,
    time_series: TimeSeries,
}

impl Population {
    pub fn new(species: Species) -> Self {
        Self {
            species,
            time_series: TimeSeries::new(),
        }
    }
}

impl Obs for Population {
    fn name(&self) -> &'static str {
        match self.species {
            Species::Predator => "n_predator",
            Species::Prey => "n_prey",
        }
    }

    fn update(&mut self, census: &Census) {
        let n_animals = match self.species {
            Species::Predator => census.n_predator(),
            Species::Prey => census.n_prey(),
        };
        self.time_series.push(n_animals as f64);
    }

    fn report(&self) -> Result<Value> {
        Ok(serde_value::to_value(self.time_series.report())?)
    }
}

/// Fraction of males among the animals of a species.
pub struct MaleFraction {
    species: Species,
    acc: Accumulator,
}

impl MaleFraction {
    pub fn new(species: Species) -> Self {
        Self {
            species,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for MaleFraction {
    fn name(&self) -> &'static str {
        match self.species {
            Species::Predator => "male_fraction_predator",
            Species::Prey => "male_fraction_prey",
        }
    }

    fn update(&mut self, census: &Census) {
        let (n_male, n_female) = match self.species {
            Species::Predator => (census.n_predator_male, census.n_predator_female),
            Species::Prey => (census.n_prey_male, census.n_prey_female),
        };
        if n_male + n_female > 0 {
            self.acc.add(n_male as f64 / (n_male + n_female) as f64);
        }
    }

    fn report(&self) -> Result<Value> {
        Ok(serde_value::to_value(self.acc.report())?)
    }
}

pub struct GrassCover {
    acc: Accumulator,
}

impl GrassCover {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for GrassCover {
    fn name(&self) -> &'static str {
        "grass_cover"
    }

    fn update(&mut self, census: &Census) {
        self.acc.add(census.grass_cover);
    }

    fn report(&self) -> Result<Value> {
        Ok(serde_value::to_value(self.acc.report())?)
    }
}

/// Total births and deaths by cause.
pub struct Vitals {
    totals: Events,
}

impl Vitals {
    pub fn new() -> Self {
        Self {
            totals: Events::default(),
        }
    }
}

impl Obs for Vitals {
    fn name(&self) -> &'static str {
        "vitals"
    }

    fn update(&mut self, census: &Census) {
        self.totals.births += census.events.births;
        self.totals.starved += census.events.starved;
        self.totals.aged_out += census.events.aged_out;
        self.totals.eaten += census.events.eaten;
    }

    fn report(&self) -> Result<Value> {
        Ok(serde_value::to_value(self.totals)?)
    }
}

/// First tick at which each species, and then everything, was gone.
pub struct Extinction {
    predator: Option<u64>,
    prey: Option<u64>,
    all: Option<u64>,
}

impl Extinction {
    pub fn new() -> Self {
        Self {
            predator: None,
            prey: None,
            all: None,
        }
    }
}

impl Obs for Extinction {
    fn name(&self) -> &'static str {
        "extinction_tick"
    }

    fn update(&mut self, census: &Census) {
        if census.n_predator() == 0 {
            self.predator = self.predator.or(Some(census.tick));
        }
        if census.n_prey() == 0 {
            self.prey = self.prey.or(Some(census.tick));
        }
        if census.extinct() {
            self.all = self.all.or(Some(census.tick));
        }
    }

    fn report(&self) -> Result<Value> {
        let mut map = BTreeMap::new();
        map.insert("predator", self.predator);
        map.insert("prey", self.prey);
        map.insert("all", self.all);
        Ok(serde_value::to_value(map)?)
    }
}

pub struct Analyzer {
    n_censuses: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(Population::new(Species::Predator)),
            Box::new(Population::new(Species::Prey)),
            Box::new(MaleFraction::new(Species::Predator)),
            Box::new(MaleFraction::new(Species::Prey)),
            Box::new(GrassCover::new()),
            Box::new(Vitals::new()),
            Box::new(Extinction::new()),
        ];
        Self {
            n_censuses: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_census(&mut self, census: &Census) {
        self.n_censuses += 1;
        for obs in &mut self.obs_ptr_vec {
            obs.update(census);
        }
    }

    /// Feed every census stored in a trajectory file.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        while !reader.fill_buf().context("failed to read file")?.is_empty() {
            let census: Census = decode::from_read(&mut reader).context("failed to read census")?;
            self.add_census(&census);
        }
        Ok(())
    }

    pub fn reports(&self) -> Result<BTreeMap<&'static str, Value>> {
        let mut reports = BTreeMap::new();
        for obs in &self.obs_ptr_vec {
            let report = obs
                .report()
                .with_context(|| format!("failed to report {}", obs.name()))?;
            reports.insert(obs.name(), report);
        }
        Ok(reports)
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let reports = self.reports()?;
        for (name, report) in &reports {
            log::info!("{name}: {report:?}");
        }
        encode::write_named(&mut writer, &reports).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;

        log::info!("analyzed {} censuses", self.n_censuses);
        Ok(())
    }
}
