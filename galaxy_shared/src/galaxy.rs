//! Procedural sector content.
//!
//! [`GalaxyGenerator`] turns a sector coordinate into a [`GalaxySector`]:
//! asteroids, at most one station, and a handful of ships. Output depends only
//! on the generator's seed, its density settings, and the coordinate, so every
//! server with the same settings sees the same sector.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_GALAXY_SEED;
use crate::ecs::{Position, Velocity, World};
use crate::math::Vec3;

/// Integer coordinate of one sector on the infinite 2D grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorCoord {
    pub x: i32,
    pub y: i32,
}

impl SectorCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for SectorCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Iron,
    Titanium,
    Naonite,
    Trinium,
    Xanion,
    Ogonite,
    Avorion,
}

impl ResourceType {
    const ALL: [ResourceType; 7] = [
        ResourceType::Iron,
        ResourceType::Titanium,
        ResourceType::Naonite,
        ResourceType::Trinium,
        ResourceType::Xanion,
        ResourceType::Ogonite,
        ResourceType::Avorion,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StationType {
    TradingPost,
    RepairDock,
    Shipyard,
    Factory,
    MiningStation,
    ResearchStation,
}

impl StationType {
    const ALL: [StationType; 6] = [
        StationType::TradingPost,
        StationType::RepairDock,
        StationType::Shipyard,
        StationType::Factory,
        StationType::MiningStation,
        StationType::ResearchStation,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShipType {
    Fighter,
    Corvette,
    Frigate,
    Destroyer,
    Cruiser,
    Battleship,
    Carrier,
}

impl ShipType {
    const ALL: [ShipType; 7] = [
        ShipType::Fighter,
        ShipType::Corvette,
        ShipType::Frigate,
        ShipType::Destroyer,
        ShipType::Cruiser,
        ShipType::Battleship,
        ShipType::Carrier,
    ];
}

const STATION_PREFIXES: [&str; 8] = [
    "Alpha", "Beta", "Gamma", "Delta", "Epsilon", "Zeta", "Nova", "Stellar",
];
const STATION_SUFFIXES: [&str; 7] = ["Station", "Outpost", "Haven", "Port", "Hub", "Terminal", "Base"];
const FACTIONS: [&str; 7] = [
    "Independent",
    "Federation",
    "Empire",
    "Republic",
    "Alliance",
    "Pirates",
    "Merchants",
];

/// Half-extent of the cube asteroids are scattered in.
pub const ASTEROID_FIELD_EXTENT: f32 = 500.0;
pub const STATION_EXTENT: f32 = 300.0;
pub const SHIP_EXTENT: f32 = 400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsteroidData {
    pub position: Vec3,
    pub size: f32,
    pub resource_type: ResourceType,
    pub resource_amount: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationData {
    pub position: Vec3,
    pub station_type: StationType,
    pub name: String,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipData {
    pub position: Vec3,
    pub velocity: Vec3,
    pub ship_type: ShipType,
    pub faction: String,
    pub hostile: bool,
}

/// Generated content of one sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalaxySector {
    pub coord: SectorCoord,
    pub asteroids: Vec<AsteroidData>,
    pub stations: Vec<StationData>,
    pub ships: Vec<ShipData>,
}

impl GalaxySector {
    pub fn empty(coord: SectorCoord) -> Self {
        Self {
            coord,
            asteroids: Vec::new(),
            stations: Vec::new(),
            ships: Vec::new(),
        }
    }

    /// Total number of generated objects.
    pub fn object_count(&self) -> usize {
        self.asteroids.len() + self.stations.len() + self.ships.len()
    }

    /// Spawns one entity per object into `world`, tagged with
    /// [`SectorObject`] and positioned. Ships also get a [`Velocity`].
    pub fn populate(&self, world: &mut World) {
        for (index, asteroid) in self.asteroids.iter().enumerate() {
            let e = world.spawn();
            world.insert(e, Position(asteroid.position));
            world.insert(e, SectorObject::Asteroid(index));
        }
        for (index, station) in self.stations.iter().enumerate() {
            let e = world.spawn();
            world.insert(e, Position(station.position));
            world.insert(e, SectorObject::Station(index));
        }
        for (index, ship) in self.ships.iter().enumerate() {
            let e = world.spawn();
            world.insert(e, Position(ship.position));
            world.insert(e, Velocity(ship.velocity));
            world.insert(e, SectorObject::Ship(index));
        }
    }
}

/// Component linking an entity back to the content entry it was spawned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectorObject {
    Asteroid(usize),
    Station(usize),
    Ship(usize),
}

/// Deterministic, seed-based sector generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GalaxyGenerator {
    seed: u32,
    pub asteroid_density: f32,
    pub station_chance: f32,
    pub ship_density: f32,
}

impl Default for GalaxyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_GALAXY_SEED)
    }
}

impl GalaxyGenerator {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            asteroid_density: 10.0,
            station_chance: 0.1,
            ship_density: 2.0,
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u32) {
        self.seed = seed;
    }

    /// Generates the full content of sector `(x, y)`.
    pub fn generate_sector(&self, x: i32, y: i32) -> GalaxySector {
        let coord = SectorCoord::new(x, y);
        let mut rng = StdRng::seed_from_u64(u64::from(self.sector_seed(x, y)));
        let mut sector = GalaxySector::empty(coord);

        self.generate_asteroids(&mut sector, &mut rng);
        self.generate_stations(&mut sector, &mut rng);
        self.generate_ships(&mut sector, &mut rng);
        sector
    }

    /// Mixes the base seed with the coordinate.
    pub fn sector_seed(&self, x: i32, y: i32) -> u32 {
        let mut hash = self.seed;
        hash ^= mix(x as u32, hash);
        hash ^= mix(y as u32, hash);
        hash
    }

    fn generate_asteroids(&self, sector: &mut GalaxySector, rng: &mut StdRng) {
        let base: i32 = rng.gen_range(5..=20);
        let count = (self.asteroid_density * base as f32 / 10.0) as usize;

        for _ in 0..count {
            sector.asteroids.push(AsteroidData {
                position: random_point(rng, ASTEROID_FIELD_EXTENT),
                size: rng.gen_range(5.0..50.0),
                resource_type: pick(rng, &ResourceType::ALL),
                resource_amount: rng.gen_range(100.0..1000.0),
            });
        }
    }

    fn generate_stations(&self, sector: &mut GalaxySector, rng: &mut StdRng) {
        if rng.gen::<f32>() >= self.station_chance {
            return;
        }
        let position = random_point(rng, STATION_EXTENT);
        let station_type = pick(rng, &StationType::ALL);
        let name = format!(
            "{} {} {}-{}",
            pick(rng, &STATION_PREFIXES),
            pick(rng, &STATION_SUFFIXES),
            sector.coord.x,
            sector.coord.y
        );
        sector.stations.push(StationData {
            position,
            station_type,
            name,
            level: rng.gen_range(1..=5),
        });
    }

    fn generate_ships(&self, sector: &mut GalaxySector, rng: &mut StdRng) {
        let base: i32 = rng.gen_range(0..=5);
        let count = (self.ship_density * base as f32 / 2.0) as usize;

        for _ in 0..count {
            sector.ships.push(ShipData {
                position: random_point(rng, SHIP_EXTENT),
                velocity: random_point(rng, 10.0),
                ship_type: pick(rng, &ShipType::ALL),
                faction: pick(rng, &FACTIONS).to_string(),
                hostile: rng.gen::<f32>() < 0.3,
            });
        }
    }
}

fn mix(value: u32, hash: u32) -> u32 {
    value
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(hash << 6)
        .wrapping_add(hash >> 2)
}

fn random_point(rng: &mut StdRng, extent: f32) -> Vec3 {
    Vec3::new(
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
    )
}

fn pick<T: Copy>(rng: &mut StdRng, options: &[T]) -> T {
    options[rng.gen_range(0..options.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_and_coord_is_deterministic() {
        let gen = GalaxyGenerator::new(99);
        assert_eq!(gen.generate_sector(3, -2), gen.generate_sector(3, -2));
        assert_eq!(
            GalaxyGenerator::new(99).generate_sector(-40, 7),
            GalaxyGenerator::new(99).generate_sector(-40, 7)
        );
    }

    #[test]
    fn sector_seed_depends_on_coord_and_seed() {
        let gen = GalaxyGenerator::new(12345);
        assert_ne!(gen.sector_seed(0, 0), gen.sector_seed(1, 0));
        assert_ne!(gen.sector_seed(1, 0), gen.sector_seed(0, 1));
        assert_ne!(gen.sector_seed(0, 0), GalaxyGenerator::new(1).sector_seed(0, 0));
    }

    #[test]
    fn content_respects_ranges() {
        let gen = GalaxyGenerator::default();
        for x in -5..5 {
            for y in -5..5 {
                let sector = gen.generate_sector(x, y);
                assert_eq!(sector.coord, SectorCoord::new(x, y));
                assert!((5..=20).contains(&sector.asteroids.len()));
                assert!(sector.stations.len() <= 1);
                assert!(sector.ships.len() <= 5);
                for a in &sector.asteroids {
                    assert!(a.position.within_cube(ASTEROID_FIELD_EXTENT));
                    assert!((5.0..50.0).contains(&a.size));
                    assert!((100.0..1000.0).contains(&a.resource_amount));
                }
                for s in &sector.stations {
                    assert!(s.name.ends_with(&format!("{}-{}", x, y)));
                    assert!((1..=5).contains(&s.level));
                }
                for s in &sector.ships {
                    assert!(s.velocity.within_cube(10.0));
                }
            }
        }
    }

    #[test]
    fn station_chance_bounds() {
        let mut gen = GalaxyGenerator::new(7);
        gen.station_chance = 1.0;
        assert_eq!(gen.generate_sector(0, 0).stations.len(), 1);
        gen.station_chance = 0.0;
        assert!(gen.generate_sector(0, 0).stations.is_empty());
    }

    #[test]
    fn populate_spawns_one_entity_per_object() {
        let sector = GalaxyGenerator::new(5).generate_sector(1, 1);
        let mut world = World::default();
        sector.populate(&mut world);

        assert_eq!(world.len(), sector.object_count());
        assert_eq!(world.iter::<SectorObject>().count(), sector.object_count());
        assert_eq!(world.iter::<Velocity>().count(), sector.ships.len());
    }
}
