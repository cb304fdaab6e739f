mod common;

use std::sync::Arc;

use common::{graph, ramp, registry, RecordingReader};
use roiflow_core::{CoreError, DType, Graph, Value};
use roiflow_ops::{
    DataSource, DatasetInfo, MultiLaneDataSelection, PayloadReader, ReaderRegistry, SerialDataset,
};
use roiflow_storage::{InMemoryStore, OperatorSerializer, PayloadStore, SerialSlot};

fn two_roles(g: &Graph, readers: Arc<ReaderRegistry>) -> MultiLaneDataSelection {
    let sel = MultiLaneDataSelection::add(g, readers, &["tczyx"]).unwrap();
    sel.set_roles(g, &["Raw", "Mask"]).unwrap();
    sel
}

fn preloaded(nickname: &str) -> DatasetInfo {
    DatasetInfo::preloaded(ramp(&[4, 5]), DType::U8).with_nickname(nickname)
}

#[test]
fn pushed_lanes_expose_their_images() {
    let g = graph();
    let sel = two_roles(&g, Arc::new(ReaderRegistry::new()));
    assert_eq!(sel.push_lane(&g, vec![Some(preloaded("a")), None]).unwrap(), 0);
    assert_eq!(sel.push_lane(&g, vec![Some(preloaded("b")), Some(preloaded("b-mask"))]).unwrap(), 1);
    assert_eq!(sel.lane_count(&g).unwrap(), 2);

    let raw = sel.image(&g, 1, 0).unwrap();
    assert!(g.is_ready(raw).unwrap());
    assert_eq!(g.meta(raw).unwrap().shape, Some(vec![1, 1, 1, 4, 5]));
    assert!(!g.is_ready(sel.image(&g, 0, 1).unwrap()).unwrap());
    assert!(g.is_ready(sel.image(&g, 1, 1).unwrap()).unwrap());

    let name = sel.lane_output(&g, "ImageName", 1).unwrap();
    assert_eq!(g.value(name).unwrap(), Value::Str("b".into()));
    let first = sel.lane_output(&g, "Image", 0).unwrap();
    assert!(g.is_ready(first).unwrap());
}

#[test]
fn failing_lane_is_rolled_back() {
    let g = graph();
    let sel = two_roles(&g, Arc::new(ReaderRegistry::new()));
    sel.push_lane(&g, vec![Some(preloaded("a"))]).unwrap();

    let flat = DatasetInfo::preloaded(ramp(&[9]), DType::U8);
    let err = sel.push_lane(&g, vec![Some(flat)]).unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation { .. }));
    assert_eq!(sel.lane_count(&g).unwrap(), 1);

    let too_many = vec![Some(preloaded("x")), None, None];
    assert!(sel.push_lane(&g, too_many).is_err());
    assert_eq!(sel.lane_count(&g).unwrap(), 1);
}

#[test]
fn lanes_drop_from_the_end() {
    let g = graph();
    let sel = two_roles(&g, Arc::new(ReaderRegistry::new()));
    sel.push_lane(&g, vec![Some(preloaded("a"))]).unwrap();
    sel.push_lane(&g, vec![Some(preloaded("b"))]).unwrap();
    sel.drop_last_lane(&g).unwrap();
    assert_eq!(sel.lane_count(&g).unwrap(), 1);
    let name = sel.lane_output(&g, "ImageName", 0).unwrap();
    assert_eq!(g.value(name).unwrap(), Value::Str("a".into()));
    sel.drop_last_lane(&g).unwrap();
    assert!(matches!(
        sel.drop_last_lane(&g),
        Err(CoreError::InvalidLaneIndex { .. })
    ));
}

fn serializer(g: &Graph, sel: &MultiLaneDataSelection) -> OperatorSerializer {
    OperatorSerializer::new("Input Data")
        .with_item(SerialSlot::new(
            g.input(sel.id(), "DatasetRoles").unwrap(),
            "Roles",
        ))
        .with_item(SerialDataset::new(
            g.input(sel.id(), "DatasetGroup").unwrap(),
            "infos",
        ))
}

#[test]
fn file_datasets_survive_a_save_and_load() {
    let reader = RecordingReader::new(&[2, 6, 6], "zyx");
    let store = InMemoryStore::new();

    let a = graph();
    let sel = two_roles(&a, registry(&reader));
    sel.push_lane(
        &a,
        vec![
            Some(DatasetInfo::filesystem("/data/cells.vol").with_nickname("cells")),
            Some(DatasetInfo::url("mem://host/masks/cells")),
        ],
    )
    .unwrap();
    let mut ser = serializer(&a, &sel);
    let mut groups = store.clone();
    ser.save(&a, &mut groups).unwrap();
    assert!(!ser.is_dirty(&a).unwrap());

    let b = graph();
    let loaded = MultiLaneDataSelection::add(&b, registry(&reader), &["tczyx"]).unwrap();
    serializer(&b, &loaded).load(&b, &store).unwrap();

    assert_eq!(loaded.roles(&b).unwrap(), vec!["Raw".to_string(), "Mask".to_string()]);
    assert_eq!(loaded.lane_count(&b).unwrap(), 1);
    let value = b.own_value(loaded.dataset_slot(&b, 0, 0).unwrap()).unwrap().unwrap();
    let info = value.downcast_ref::<DatasetInfo>().unwrap();
    assert_eq!(info.nickname, "cells");
    assert!(matches!(info.source, DataSource::Filesystem { relative: false, .. }));

    let mask = loaded.image(&b, 0, 1).unwrap();
    assert!(b.is_ready(mask).unwrap());
    assert_eq!(b.meta(mask).unwrap().shape, Some(vec![1, 1, 2, 6, 6]));
    let opened = reader.opened.lock().unwrap().clone();
    assert!(opened.iter().any(|l| l == "/data/cells.vol"));
    assert!(opened.iter().any(|l| l == "mem://host/masks/cells"));
}

#[test]
fn in_memory_datasets_are_skipped_on_save() {
    let store = InMemoryStore::new();
    let a = graph();
    let sel = two_roles(&a, Arc::new(ReaderRegistry::new()));
    sel.push_lane(&a, vec![Some(preloaded("a"))]).unwrap();
    let mut groups = store.clone();
    serializer(&a, &sel).save(&a, &mut groups).unwrap();

    let b = graph();
    let loaded = MultiLaneDataSelection::add(&b, Arc::new(ReaderRegistry::new()), &["tczyx"]).unwrap();
    serializer(&b, &loaded).load(&b, &store).unwrap();
    assert_eq!(loaded.lane_count(&b).unwrap(), 1);
    let slot = loaded.dataset_slot(&b, 0, 0).unwrap();
    assert!(b.own_value(slot).unwrap().is_none());
}

fn importing_serializer(
    g: &Graph,
    sel: &MultiLaneDataSelection,
    payloads: &Arc<dyn PayloadStore>,
) -> OperatorSerializer {
    OperatorSerializer::new("Input Data")
        .with_item(SerialSlot::new(
            g.input(sel.id(), "DatasetRoles").unwrap(),
            "Roles",
        ))
        .with_item(
            SerialDataset::new(g.input(sel.id(), "DatasetGroup").unwrap(), "infos")
                .with_payload_store(payloads.clone()),
        )
}

#[test]
fn in_memory_datasets_are_imported_into_the_project_on_save() {
    let store = InMemoryStore::new();
    let payloads: Arc<dyn PayloadStore> = Arc::new(store.clone());
    let a = graph();
    let sel = two_roles(&a, Arc::new(ReaderRegistry::new()));
    sel.push_lane(&a, vec![Some(preloaded("a")), None]).unwrap();
    let mut groups = store.clone();
    importing_serializer(&a, &sel, &payloads).save(&a, &mut groups).unwrap();
    assert_eq!(store.payload_count().unwrap(), 1);

    let b = graph();
    let readers = ReaderRegistry::new().with_project(Arc::new(PayloadReader::new(payloads.clone())));
    let loaded = MultiLaneDataSelection::add(&b, Arc::new(readers), &["tczyx"]).unwrap();
    importing_serializer(&b, &loaded, &payloads).load(&b, &store).unwrap();

    let value = b.own_value(loaded.dataset_slot(&b, 0, 0).unwrap()).unwrap().unwrap();
    let info = value.downcast_ref::<DatasetInfo>().unwrap();
    assert_eq!(info.nickname, "a");
    assert!(matches!(
        info.source,
        DataSource::ProjectInternal { ref inner_path } if inner_path.starts_with("local_data/")
    ));

    let raw = loaded.image(&b, 0, 0).unwrap();
    assert_eq!(b.meta(raw).unwrap().shape, Some(vec![1, 1, 1, 4, 5]));
    let data = b.get_all(raw).unwrap().wait().unwrap();
    assert_eq!(
        data.iter().copied().collect::<Vec<_>>(),
        ramp(&[4, 5]).iter().copied().collect::<Vec<_>>()
    );
}

#[test]
fn only_in_memory_data_can_be_imported() {
    let store = InMemoryStore::new();
    let imported = preloaded("a").import_as_local(&store).unwrap();
    assert_eq!(imported.import_as_local(&store).unwrap().nickname, "a");
    assert_eq!(store.payload_count().unwrap(), 1);
    assert!(DatasetInfo::filesystem("/data/cells.vol").import_as_local(&store).is_err());
    assert!(DatasetInfo::missing(&[2, 2], DType::U8).import_as_local(&store).is_err());
}
