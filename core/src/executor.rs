use crate::dialect::Dialect;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Something that can run compiled statements.
///
/// The connection layer implements this; builders only ever see this seam,
/// never a concrete driver.
pub trait Executor {
    /// Dialect statements are compiled for.
    fn dialect(&self) -> Dialect;

    /// Runs a statement that returns rows.
    fn select(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    fn affecting_statement(&mut self, sql: &str, bindings: &[Value]) -> Result<u64>;

    /// Row id generated by the last insert, when the engine tracks one.
    fn last_insert_id(&mut self) -> Result<Option<i64>>;

    /// Hands rows to `each` one at a time until it returns `false`.
    ///
    /// The default buffers the whole result; connections override it to
    /// stream from the native cursor.
    fn cursor(
        &mut self,
        sql: &str,
        bindings: &[Value],
        each: &mut dyn FnMut(Row) -> bool,
    ) -> Result<()> {
        for row in self.select(sql, bindings)? {
            if !each(row) {
                break;
            }
        }
        Ok(())
    }
}
