//! Persistence contract and the file-backed implementation.
//!
//! The store keeps object tuples `(object_type, id, name, serialized)`,
//! relation tuples per route, a settings key-value table and one
//! hardware-parameter row per control. Payloads use the flat codec of
//! the entities themselves; the store never interprets them.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use railyard_common::ids::{ObjectIdentifier, ObjectType};
use railyard_common::model::accessory::Accessory;
use railyard_common::model::feedback::Feedback;
use railyard_common::model::layer::Layer;
use railyard_common::model::lockable::LockState;
use railyard_common::model::loco::Loco;
use railyard_common::model::relation::Relation;
use railyard_common::model::route::Route;
use railyard_common::model::signal::Signal;
use railyard_common::model::switch::Switch;
use railyard_common::model::track::Track;
use railyard_common::model::{LayoutContext, LockableObject, TrackBase};
use railyard_common::settings::Settings;

use railyard_hal::HardwareParams;

use crate::manager::Manager;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(String),

    #[error("storage record corrupt: {0}")]
    Corrupt(String),
}

/// Which relation list of a route a tuple belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelationSlot {
    AtLock,
    AtUnlock,
}

impl RelationSlot {
    pub const fn tag(self) -> &'static str {
        match self {
            RelationSlot::AtLock => "atlock",
            RelationSlot::AtUnlock => "atunlock",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "atlock" => Some(RelationSlot::AtLock),
            "atunlock" => Some(RelationSlot::AtUnlock),
            _ => None,
        }
    }
}

/// Save/load contract of the persistence layer.
pub trait StorageHandler: Send {
    fn save_object(
        &mut self,
        kind: ObjectType,
        id: u16,
        name: &str,
        serialized: &str,
    ) -> Result<(), StorageError>;

    fn delete_object(&mut self, kind: ObjectType, id: u16) -> Result<(), StorageError>;

    /// All serialized payloads of a kind, ordered by id.
    fn load_objects(&mut self, kind: ObjectType) -> Result<Vec<String>, StorageError>;

    fn save_relations(
        &mut self,
        owner: ObjectIdentifier,
        slot: RelationSlot,
        serialized: &[String],
    ) -> Result<(), StorageError>;

    fn load_relations(
        &mut self,
        owner: ObjectIdentifier,
        slot: RelationSlot,
    ) -> Result<Vec<String>, StorageError>;

    fn save_setting(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    fn load_settings(&mut self) -> Result<HashMap<String, String>, StorageError>;

    fn save_hardware_params(&mut self, params: &HardwareParams) -> Result<(), StorageError>;

    fn load_hardware_params(&mut self) -> Result<Vec<HardwareParams>, StorageError>;
}

// ─── File-backed implementation ─────────────────────────────────────

const OBJECTS_FILE: &str = "objects.tsv";
const RELATIONS_FILE: &str = "relations.tsv";
const SETTINGS_FILE: &str = "settings.tsv";
const HARDWARE_FILE: &str = "hardware.tsv";

/// Tab-separated tables under a data directory, rewritten on every
/// mutation. Layouts are small; simplicity beats cleverness here.
pub struct FileStorage {
    dir: PathBuf,
    objects: BTreeMap<(u8, u16), (String, String)>,
    relations: BTreeMap<(u8, u16, RelationSlot), Vec<String>>,
    settings: BTreeMap<String, String>,
    hardware: BTreeMap<u8, String>,
}

impl FileStorage {
    /// Open (or initialize) the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| StorageError::Io(e.to_string()))?;
        let mut storage = Self {
            dir: dir.to_path_buf(),
            objects: BTreeMap::new(),
            relations: BTreeMap::new(),
            settings: BTreeMap::new(),
            hardware: BTreeMap::new(),
        };
        storage.read_all()?;
        Ok(storage)
    }

    fn read_all(&mut self) -> Result<(), StorageError> {
        for line in read_lines(&self.dir.join(OBJECTS_FILE))? {
            let mut parts = line.splitn(4, '\t');
            let (Some(kind), Some(id), Some(name), Some(serialized)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(StorageError::Corrupt(format!("object line '{line}'")));
            };
            let kind = ObjectType::from_name(kind)
                .ok_or_else(|| StorageError::Corrupt(format!("object kind '{kind}'")))?;
            let id = id
                .parse::<u16>()
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            self.objects
                .insert((kind.code(), id), (name.to_string(), serialized.to_string()));
        }
        for line in read_lines(&self.dir.join(RELATIONS_FILE))? {
            let mut parts = line.splitn(4, '\t');
            let (Some(kind), Some(id), Some(slot), Some(serialized)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(StorageError::Corrupt(format!("relation line '{line}'")));
            };
            let kind = ObjectType::from_name(kind)
                .ok_or_else(|| StorageError::Corrupt(format!("relation owner '{kind}'")))?;
            let id = id
                .parse::<u16>()
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            let slot = RelationSlot::from_tag(slot)
                .ok_or_else(|| StorageError::Corrupt(format!("relation slot '{slot}'")))?;
            self.relations
                .entry((kind.code(), id, slot))
                .or_default()
                .push(serialized.to_string());
        }
        for line in read_lines(&self.dir.join(SETTINGS_FILE))? {
            if let Some((key, value)) = line.split_once('\t') {
                self.settings.insert(key.to_string(), value.to_string());
            }
        }
        for line in read_lines(&self.dir.join(HARDWARE_FILE))? {
            if let Some((control, serialized)) = line.split_once('\t') {
                let control = control
                    .parse::<u8>()
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                self.hardware.insert(control, serialized.to_string());
            }
        }
        Ok(())
    }

    fn write_objects(&self) -> Result<(), StorageError> {
        let mut out = String::new();
        for ((kind, id), (name, serialized)) in &self.objects {
            let kind = ObjectType::from_code(*kind).map(|k| k.name()).unwrap_or("?");
            out.push_str(&format!("{kind}\t{id}\t{name}\t{serialized}\n"));
        }
        write_file(&self.dir.join(OBJECTS_FILE), &out)
    }

    fn write_relations(&self) -> Result<(), StorageError> {
        let mut out = String::new();
        for ((kind, id, slot), items) in &self.relations {
            let kind = ObjectType::from_code(*kind).map(|k| k.name()).unwrap_or("?");
            for serialized in items {
                out.push_str(&format!("{kind}\t{id}\t{}\t{serialized}\n", slot.tag()));
            }
        }
        write_file(&self.dir.join(RELATIONS_FILE), &out)
    }

    fn write_settings(&self) -> Result<(), StorageError> {
        let mut out = String::new();
        for (key, value) in &self.settings {
            out.push_str(&format!("{key}\t{value}\n"));
        }
        write_file(&self.dir.join(SETTINGS_FILE), &out)
    }

    fn write_hardware(&self) -> Result<(), StorageError> {
        let mut out = String::new();
        for (control, serialized) in &self.hardware {
            out.push_str(&format!("{control}\t{serialized}\n"));
        }
        write_file(&self.dir.join(HARDWARE_FILE), &out)
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StorageError::Io(e.to_string())),
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), StorageError> {
    let mut file = fs::File::create(path).map_err(|e| StorageError::Io(e.to_string()))?;
    file.write_all(content.as_bytes())
        .map_err(|e| StorageError::Io(e.to_string()))
}

impl StorageHandler for FileStorage {
    fn save_object(
        &mut self,
        kind: ObjectType,
        id: u16,
        name: &str,
        serialized: &str,
    ) -> Result<(), StorageError> {
        self.objects
            .insert((kind.code(), id), (name.to_string(), serialized.to_string()));
        self.write_objects()
    }

    fn delete_object(&mut self, kind: ObjectType, id: u16) -> Result<(), StorageError> {
        self.objects.remove(&(kind.code(), id));
        self.relations
            .retain(|(owner_kind, owner_id, _), _| !(*owner_kind == kind.code() && *owner_id == id));
        self.write_objects()?;
        self.write_relations()
    }

    fn load_objects(&mut self, kind: ObjectType) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind.code())
            .map(|(_, (_, serialized))| serialized.clone())
            .collect())
    }

    fn save_relations(
        &mut self,
        owner: ObjectIdentifier,
        slot: RelationSlot,
        serialized: &[String],
    ) -> Result<(), StorageError> {
        let key = (owner.kind.code(), owner.id, slot);
        if serialized.is_empty() {
            self.relations.remove(&key);
        } else {
            self.relations.insert(key, serialized.to_vec());
        }
        self.write_relations()
    }

    fn load_relations(
        &mut self,
        owner: ObjectIdentifier,
        slot: RelationSlot,
    ) -> Result<Vec<String>, StorageError> {
        Ok(self
            .relations
            .get(&(owner.kind.code(), owner.id, slot))
            .cloned()
            .unwrap_or_default())
    }

    fn save_setting(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.settings.insert(key.to_string(), value.to_string());
        self.write_settings()
    }

    fn load_settings(&mut self) -> Result<HashMap<String, String>, StorageError> {
        Ok(self.settings.clone().into_iter().collect())
    }

    fn save_hardware_params(&mut self, params: &HardwareParams) -> Result<(), StorageError> {
        self.hardware.insert(params.control.0, params.serialize());
        self.write_hardware()
    }

    fn load_hardware_params(&mut self) -> Result<Vec<HardwareParams>, StorageError> {
        self.hardware
            .values()
            .map(|serialized| {
                HardwareParams::deserialize(serialized)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))
            })
            .collect()
    }
}

// ─── Layout load and save ───────────────────────────────────────────

/// Populate a fresh manager from the store.
///
/// Load order respects the reference directions: settings, layers,
/// the track-bases and accessory family, feedbacks, routes with their
/// relations, locomotives. Placements are then restored from the
/// persisted lock owners. Returns the hardware parameter rows for the
/// caller to construct drivers from.
pub fn load_layout(
    manager: &Manager,
    storage: &mut dyn StorageHandler,
) -> Result<Vec<HardwareParams>, StorageError> {
    let settings = Settings::from_pairs(&storage.load_settings()?);
    manager.update_settings(settings);

    for serialized in storage.load_objects(ObjectType::Layer)? {
        match Layer::deserialize(&serialized) {
            Ok(layer) => manager.restore_layer(Arc::new(layer)),
            Err(err) => warn!(%err, "skipping corrupt layer"),
        }
    }
    for serialized in storage.load_objects(ObjectType::Track)? {
        match Track::deserialize(&serialized) {
            Ok(track) => manager.restore_track(Arc::new(track)),
            Err(err) => warn!(%err, "skipping corrupt track"),
        }
    }
    for serialized in storage.load_objects(ObjectType::Signal)? {
        match Signal::deserialize(&serialized) {
            Ok(signal) => manager.restore_signal(Arc::new(signal)),
            Err(err) => warn!(%err, "skipping corrupt signal"),
        }
    }
    for serialized in storage.load_objects(ObjectType::Switch)? {
        match Switch::deserialize(&serialized) {
            Ok(switch) => manager.restore_switch(Arc::new(switch)),
            Err(err) => warn!(%err, "skipping corrupt switch"),
        }
    }
    for serialized in storage.load_objects(ObjectType::Accessory)? {
        match Accessory::deserialize(&serialized) {
            Ok(accessory) => manager.restore_accessory(Arc::new(accessory)),
            Err(err) => warn!(%err, "skipping corrupt accessory"),
        }
    }
    for serialized in storage.load_objects(ObjectType::Feedback)? {
        match Feedback::deserialize(&serialized) {
            Ok(feedback) => manager.restore_feedback(Arc::new(feedback)),
            Err(err) => warn!(%err, "skipping corrupt feedback"),
        }
    }
    for serialized in storage.load_objects(ObjectType::Route)? {
        let route = match Route::deserialize(&serialized) {
            Ok(route) => route,
            Err(err) => {
                warn!(%err, "skipping corrupt route");
                continue;
            }
        };
        let mut core = route.core();
        core.at_lock = load_relation_list(storage, route.identifier(), RelationSlot::AtLock)?;
        core.at_unlock = load_relation_list(storage, route.identifier(), RelationSlot::AtUnlock)?;
        // Stale lock owners must not survive a restart; routes come
        // back free so the relation lists can be attached.
        route.lockable().release_force();
        if let Err(err) = route.update(core) {
            warn!(route = %route.object_name(), %err, "unable to attach relations");
        }
        manager.restore_route(Arc::new(route));
    }
    for serialized in storage.load_objects(ObjectType::Loco)? {
        match Loco::deserialize(&serialized) {
            Ok(loco) => manager.restore_loco(Arc::new(loco)),
            Err(err) => warn!(%err, "skipping corrupt loco"),
        }
    }

    rebuild_indexes(manager);
    restore_placements(manager);

    let params = storage.load_hardware_params()?;
    info!(
        tracks = manager.tracks().len(),
        signals = manager.signals().len(),
        routes = manager.routes().len(),
        locos = manager.locos().len(),
        controls = params.len(),
        "layout loaded"
    );
    Ok(params)
}

fn load_relation_list(
    storage: &mut dyn StorageHandler,
    owner: ObjectIdentifier,
    slot: RelationSlot,
) -> Result<Vec<Relation>, StorageError> {
    let mut relations = Vec::new();
    for serialized in storage.load_relations(owner, slot)? {
        match Relation::deserialize(&serialized) {
            Ok(relation) => relations.push(relation),
            Err(err) => warn!(%owner, %err, "skipping corrupt relation"),
        }
    }
    Ok(relations)
}

/// Outgoing-route index and feedback back-pointers are derived data;
/// rebuild them from the loaded routes and track-bases.
fn rebuild_indexes(manager: &Manager) {
    for route in manager.routes() {
        if let Some(from) = route.from_track() {
            if let Some(base) = manager.track_base(from) {
                base.add_route_from(route.id());
            }
        }
    }
    for track in manager.tracks() {
        for feedback in track.feedbacks() {
            if let Some(feedback) = manager.feedback(feedback) {
                feedback.set_related_track(Some(track.identifier()));
            }
        }
    }
    for signal in manager.signals() {
        for feedback in signal.feedbacks() {
            if let Some(feedback) = manager.feedback(feedback) {
                feedback.set_related_track(Some(signal.identifier()));
            }
        }
    }
}

/// A track-base hard-locked by a known locomotive at save time is that
/// locomotive's placement; anything else is a stale lock and is freed.
fn restore_placements(manager: &Manager) {
    let mut bases: Vec<Arc<dyn TrackBase>> = Vec::new();
    for track in manager.tracks() {
        bases.push(track as Arc<dyn TrackBase>);
    }
    for signal in manager.signals() {
        bases.push(signal as Arc<dyn TrackBase>);
    }
    for base in bases {
        let Some(owner) = base.lockable().owner() else {
            continue;
        };
        match manager.loco(owner) {
            Some(loco) if base.lockable().state() == LockState::HardLocked => {
                let mut auto = loco.auto_state();
                if auto.track_from.is_none() {
                    auto.track_from = Some(Arc::clone(&base));
                    info!(loco = %loco.object_name(), track = %base.object_name(),
                        "placement restored");
                    continue;
                }
                drop(auto);
                warn!(track = %base.object_name(), "duplicate placement, freeing");
                base.lockable().release_force();
            }
            _ => {
                warn!(track = %base.object_name(), %owner, "stale lock, freeing");
                base.lockable().release_force();
            }
        }
    }
    // Other lockables never survive a restart as owned.
    for switch in manager.switches() {
        switch.lockable().release_force();
    }
    for accessory in manager.accessories() {
        accessory.lockable().release_force();
    }
}

/// Persist every entity, the settings and the relation tuples.
pub fn save_layout(manager: &Manager, storage: &mut dyn StorageHandler) -> Result<(), StorageError> {
    for (key, value) in manager.settings().to_pairs() {
        storage.save_setting(&key, &value)?;
    }
    for layer in manager.layers() {
        storage.save_object(
            ObjectType::Layer,
            layer.id().0 as u16,
            &layer.name(),
            &layer.serialize(),
        )?;
    }
    for track in manager.tracks() {
        storage.save_object(
            ObjectType::Track,
            track.id().0,
            &track.object_name(),
            &track.serialize(),
        )?;
    }
    for signal in manager.signals() {
        storage.save_object(
            ObjectType::Signal,
            signal.id().0,
            &signal.object_name(),
            &signal.serialize(),
        )?;
    }
    for switch in manager.switches() {
        storage.save_object(
            ObjectType::Switch,
            switch.id().0,
            &switch.object_name(),
            &switch.serialize(),
        )?;
    }
    for accessory in manager.accessories() {
        storage.save_object(
            ObjectType::Accessory,
            accessory.id().0,
            &accessory.object_name(),
            &accessory.serialize(),
        )?;
    }
    for feedback in manager.feedbacks() {
        storage.save_object(
            ObjectType::Feedback,
            feedback.id().0,
            &feedback.object_name(),
            &feedback.serialize(),
        )?;
    }
    for route in manager.routes() {
        storage.save_object(
            ObjectType::Route,
            route.id().0,
            &route.object_name(),
            &route.serialize(),
        )?;
        let at_lock: Vec<String> = route
            .relations_at_lock()
            .iter()
            .map(Relation::serialize)
            .collect();
        let at_unlock: Vec<String> = route
            .relations_at_unlock()
            .iter()
            .map(Relation::serialize)
            .collect();
        storage.save_relations(route.identifier(), RelationSlot::AtLock, &at_lock)?;
        storage.save_relations(route.identifier(), RelationSlot::AtUnlock, &at_unlock)?;
    }
    for loco in manager.locos() {
        storage.save_object(
            ObjectType::Loco,
            loco.id().0,
            &loco.object_name(),
            &loco.serialize(),
        )?;
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use railyard_common::ids::{RouteId, TrackId};
    use railyard_hal::HardwareType;
    use railyard_common::ids::ControlId;
    use tempfile::TempDir;

    #[test]
    fn object_tuples_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut storage = FileStorage::open(dir.path()).unwrap();
            storage
                .save_object(ObjectType::Track, 1, "T1", "objectType=Track;id=1;name=T1")
                .unwrap();
            storage
                .save_object(ObjectType::Loco, 2, "V100", "objectType=Loco;id=2;name=V100")
                .unwrap();
        }
        let mut storage = FileStorage::open(dir.path()).unwrap();
        let tracks = storage.load_objects(ObjectType::Track).unwrap();
        assert_eq!(tracks, vec!["objectType=Track;id=1;name=T1".to_string()]);
        let locos = storage.load_objects(ObjectType::Loco).unwrap();
        assert_eq!(locos.len(), 1);
    }

    #[test]
    fn delete_removes_object_and_relations() {
        let dir = TempDir::new().unwrap();
        let mut storage = FileStorage::open(dir.path()).unwrap();
        let owner = ObjectIdentifier::route(RouteId(3));
        storage
            .save_object(ObjectType::Route, 3, "R3", "objectType=Route;id=3")
            .unwrap();
        storage
            .save_relations(
                owner,
                RelationSlot::AtLock,
                &["objectType=Relation;targettype=3;targetid=1;state=0;priority=1".to_string()],
            )
            .unwrap();

        storage.delete_object(ObjectType::Route, 3).unwrap();
        assert!(storage.load_objects(ObjectType::Route).unwrap().is_empty());
        assert!(storage
            .load_relations(owner, RelationSlot::AtLock)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn settings_and_hardware_roundtrip() {
        let dir = TempDir::new().unwrap();
        {
            let mut storage = FileStorage::open(dir.path()).unwrap();
            storage.save_setting("loglevel", "1").unwrap();
            storage
                .save_hardware_params(&HardwareParams::new(
                    ControlId(1),
                    HardwareType::Simulation,
                    "sim",
                    "",
                ))
                .unwrap();
        }
        let mut storage = FileStorage::open(dir.path()).unwrap();
        assert_eq!(
            storage.load_settings().unwrap().get("loglevel"),
            Some(&"1".to_string())
        );
        let params = storage.load_hardware_params().unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].hardware_type, HardwareType::Simulation);
    }

    #[test]
    fn relation_slots_are_separate() {
        let dir = TempDir::new().unwrap();
        let mut storage = FileStorage::open(dir.path()).unwrap();
        let owner = ObjectIdentifier::route(RouteId(1));
        storage
            .save_relations(owner, RelationSlot::AtLock, &["a=1".to_string()])
            .unwrap();
        storage
            .save_relations(owner, RelationSlot::AtUnlock, &["b=2".to_string()])
            .unwrap();
        assert_eq!(
            storage.load_relations(owner, RelationSlot::AtLock).unwrap(),
            vec!["a=1".to_string()]
        );
        assert_eq!(
            storage
                .load_relations(owner, RelationSlot::AtUnlock)
                .unwrap(),
            vec!["b=2".to_string()]
        );
    }

    #[test]
    fn corrupt_object_line_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(OBJECTS_FILE), "Track\tnotanumber\tT\tx\n").unwrap();
        assert!(matches!(
            FileStorage::open(dir.path()),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn track_id_helper_compiles() {
        // Guards the public id surface used by the loaders.
        let id = TrackId(7);
        assert_eq!(ObjectIdentifier::track(id).id, 7);
    }
}
