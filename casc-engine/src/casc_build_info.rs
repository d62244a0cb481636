use crate::error::{CascError, Result};
use crate::utility::dsv_file::{BarRow, BarTable};
use std::path::Path;
use tracing::debug;

/// Name of the build info file at the root of a local installation.
pub const BUILD_INFO_FILE: &str = ".build.info";

/// Build information loaded from a local `.build.info` file.
///
/// A `.build.info` may describe several products installed side by side; the
/// storage picks one row with [`CascBuildInfo::select_row`].
#[derive(Debug, Clone)]
pub struct CascBuildInfo {
    table: BarTable,
}

impl CascBuildInfo {
    /// Loads build info from `<root>/.build.info`.
    pub fn from_root<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::from_file(root.as_ref().join(BUILD_INFO_FILE))
    }

    /// Loads build info from the specified file.
    pub fn from_file<P: AsRef<Path>>(file_name: P) -> Result<Self> {
        let table = BarTable::from_file(file_name)?;
        Ok(Self { table })
    }

    pub fn parse_str(text: &str) -> Result<Self> {
        Ok(Self {
            table: BarTable::parse_str(text, BUILD_INFO_FILE)?,
        })
    }

    pub fn table(&self) -> &BarTable {
        &self.table
    }

    pub fn has_product_column(&self) -> bool {
        self.table.has_column("Product")
    }

    /// Picks the row describing the build to open.
    ///
    /// With a product and a `Product` column, the row for that product is
    /// required. Otherwise the first row with `Active` set to `1` wins, then
    /// simply the first row.
    pub fn select_row(&self, product: Option<&str>) -> Result<&BarRow> {
        if let Some(product) = product.filter(|_| self.has_product_column()) {
            return self.table.find_row("Product", product).ok_or_else(|| {
                CascError::FileNotFound(format!("No build info row for product '{product}'"))
            });
        }

        let row = self
            .table
            .find_row("Active", "1")
            .or_else(|| self.table.rows().first())
            .ok_or_else(|| CascError::InvalidData("Build info has no rows".to_string()))?;
        debug!("Selected build info row {:?}", row.get("Build Key"));
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILD_INFO: &str = "\
Branch!STRING:0|Active!DEC:1|Build Key!HEX:16|CDN Key!HEX:16|CDN Path!STRING:0|CDN Hosts!STRING:0|Version!STRING:0|Product!STRING:0
eu|0|11111111111111111111111111111111|22222222222222222222222222222222|tpr/wow|a.example b.example|1.0.0.1|wow_classic
us|1|33333333333333333333333333333333|44444444444444444444444444444444|tpr/wow|a.example|2.0.0.2|wow
";

    #[test]
    fn selects_by_product() {
        let info = CascBuildInfo::parse_str(BUILD_INFO).unwrap();
        let row = info.select_row(Some("wow_classic")).unwrap();
        assert_eq!(row.get("Version"), Some("1.0.0.1"));
        assert!(info.select_row(Some("d3")).is_err());
    }

    #[test]
    fn falls_back_to_active_row() {
        let info = CascBuildInfo::parse_str(BUILD_INFO).unwrap();
        let row = info.select_row(None).unwrap();
        assert_eq!(row.get("Build Key"), Some("33333333333333333333333333333333"));
    }

    #[test]
    fn without_product_column_product_is_ignored() {
        let info = CascBuildInfo::parse_str(
            "Active!DEC:1|Build Key!HEX:16\n0|aa\n0|bb\n",
        )
        .unwrap();
        assert!(!info.has_product_column());
        let row = info.select_row(Some("wow")).unwrap();
        assert_eq!(row.get("Build Key"), Some("aa"));
    }
}
