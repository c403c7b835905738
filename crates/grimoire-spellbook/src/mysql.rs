//! MySQL-family spellbook. The trait defaults are already MySQL-flavored
//! (backtick quoting, index hints, `ON DUPLICATE KEY UPDATE`, native
//! table-qualified rows in nest-tables mode), so this book adds nothing on
//! top of them.

use crate::book::Spellbook;
use crate::Dialect;

/// Statement formatter for MySQL and friends (MariaDB).
#[derive(Clone, Copy, Debug, Default)]
pub struct MySqlSpellbook;

impl Spellbook for MySqlSpellbook {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }
}
