//! Well-known command codes and their human-readable names

use std::collections::HashMap;

use crate::core::Command;

pub const SET_BUTTON_PRESSED_RESPONDER: Command = Command::standard(0x01, 0x00);
pub const SET_BUTTON_PRESSED_CONTROLLER: Command = Command::standard(0x02, 0x00);
pub const ALL_LINK_SUCCESS_REPORT: Command = Command::standard(0x06, 0x00);
pub const EXIT_LINKING_MODE: Command = Command::standard(0x08, 0x00);
pub const ENTER_LINKING_MODE: Command = Command::standard(0x09, 0x00);
pub const ENTER_UNLINKING_MODE: Command = Command::standard(0x0a, 0x00);
pub const GET_ENGINE_VERSION: Command = Command::standard(0x0d, 0x00);
pub const PING: Command = Command::standard(0x0f, 0x00);
pub const ID_REQUEST: Command = Command::standard(0x10, 0x00);
pub const LIGHT_ON: Command = Command::standard(0x11, 0xff);
pub const LIGHT_ON_FAST: Command = Command::standard(0x12, 0xff);
pub const LIGHT_OFF: Command = Command::standard(0x13, 0x00);
pub const LIGHT_OFF_FAST: Command = Command::standard(0x14, 0x00);
pub const BRIGHTEN: Command = Command::standard(0x15, 0x00);
pub const DIM: Command = Command::standard(0x16, 0x00);
pub const STATUS_REQUEST: Command = Command::standard(0x19, 0x00);

pub const EXTENDED_GET_SET: Command = Command::extended(0x2e, 0x00);
pub const READ_WRITE_ALDB: Command = Command::extended(0x2f, 0x00);
pub const EXTENDED_ENTER_LINKING_MODE: Command = Command::extended(0x09, 0x00);
pub const EXTENDED_ENTER_UNLINKING_MODE: Command = Command::extended(0x0a, 0x00);

/// Name lookup for command codes.
///
/// Built once and then only read. Commands whose cmd2 is a parameter (levels,
/// groups) are registered by kind so every cmd2 value resolves to them.
#[derive(Debug, Clone)]
pub struct CommandTable {
    exact: HashMap<Command, &'static str>,
    by_kind: HashMap<[u8; 2], &'static str>,
}

impl CommandTable {
    pub fn new() -> Self {
        let mut table = CommandTable {
            exact: HashMap::new(),
            by_kind: HashMap::new(),
        };

        table.register(EXIT_LINKING_MODE, "Exit Linking Mode");
        table.register(GET_ENGINE_VERSION, "Get Engine Version");
        table.register(PING, "Ping");
        table.register(ID_REQUEST, "ID Request");
        table.register(STATUS_REQUEST, "Status Request");
        table.register(EXTENDED_GET_SET, "Extended Get/Set");
        table.register(READ_WRITE_ALDB, "Read/Write ALDB");

        table.register_kind(SET_BUTTON_PRESSED_RESPONDER, "Set-button Pressed (responder)");
        table.register_kind(SET_BUTTON_PRESSED_CONTROLLER, "Set-button Pressed (controller)");
        table.register_kind(ALL_LINK_SUCCESS_REPORT, "All-link Success Report");
        table.register_kind(ENTER_LINKING_MODE, "Enter Linking Mode");
        table.register_kind(ENTER_UNLINKING_MODE, "Enter Unlinking Mode");
        table.register_kind(EXTENDED_ENTER_LINKING_MODE, "Enter Linking Mode (i2cs)");
        table.register_kind(EXTENDED_ENTER_UNLINKING_MODE, "Enter Unlinking Mode (i2cs)");
        table.register_kind(LIGHT_ON, "Light On");
        table.register_kind(LIGHT_ON_FAST, "Light On Fast");
        table.register_kind(LIGHT_OFF, "Light Off");
        table.register_kind(LIGHT_OFF_FAST, "Light Off Fast");
        table.register_kind(BRIGHTEN, "Brighten");
        table.register_kind(DIM, "Dim");

        table
    }

    /// Registers a name for exactly this command
    pub fn register(&mut self, command: Command, name: &'static str) {
        self.exact.insert(command, name);
    }

    /// Registers a name for every cmd2 value of this command
    pub fn register_kind(&mut self, command: Command, name: &'static str) {
        self.by_kind.insert([command.0[0], command.0[1]], name);
    }

    pub fn name(&self, command: &Command) -> Option<&'static str> {
        self.exact
            .get(command)
            .or_else(|| self.by_kind.get(&[command.0[0], command.0[1]]))
            .copied()
    }

    /// The registered name, or the canonical numeric form
    pub fn describe(&self, command: &Command) -> String {
        match self.name(command) {
            Some(name) => name.to_string(),
            None => command.to_string(),
        }
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        CommandTable::new()
    }
}
