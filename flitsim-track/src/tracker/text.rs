// Copyright (c) 2020 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;

use crate::tracker::{EntityManager, Track};
use crate::{Id, Writer};

/// A simple text tracker to output messages to a Writer.
///
/// Each line is prefixed with the current simulation tick and the full name
/// of the entity that emitted it.
pub struct TextTracker {
    entity_manager: EntityManager,

    /// Writer to which all _log_ events will be written.
    writer: RefCell<Writer>,
}

impl TextTracker {
    /// Create a new [`TextTracker`] with an [`EntityManager`].
    #[must_use]
    pub fn new(entity_manager: EntityManager, writer: Writer) -> Self {
        Self {
            entity_manager,
            writer: RefCell::new(writer),
        }
    }

    fn write_line(&self, id: Id, line: fmt::Arguments) {
        let tick = self.entity_manager.tick();
        let name = self.entity_manager.name_of(id);
        // Output is best-effort, a failed write must not stop the simulation
        let _ = writeln!(self.writer.borrow_mut(), "{tick}: {name}: {line}");
    }
}

impl Track for TextTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_enabled(id, level)
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
    }

    fn enter(&self, id: Id, object: Id) {
        self.write_line(id, format_args!("{object} entered"));
    }

    fn exit(&self, id: Id, object: Id) {
        self.write_line(id, format_args!("{object} exited"));
    }

    fn value(&self, id: Id, value: f64) {
        self.write_line(id, format_args!("value {value}"));
    }

    fn create(&self, created_by: Id, id: Id, num_bytes: usize, req_type: i8, name: &str) {
        self.write_line(
            created_by,
            format_args!("created {id}, {name}, {req_type}, {num_bytes} bytes"),
        );
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        self.write_line(destroyed_by, format_args!("destroyed {id}"));
    }

    fn connect(&self, connect_from: Id, connect_to: Id) {
        let to_name = self.entity_manager.name_of(connect_to);
        self.write_line(connect_from, format_args!("connect to {to_name}"));
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.write_line(id, format_args!("{level}: {msg}"));
    }

    fn time(&self, _set_by: Id, tick: u64) {
        self.entity_manager.set_tick(tick);
    }

    fn shutdown(&self) {
        let _ = self.writer.borrow_mut().flush();
    }
}
