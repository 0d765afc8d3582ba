use std::io::{Read, Write};
use std::path::Path;

use crate::bins::BinConfig;
use crate::error::LoadError;
use crate::grid::RebateGrid;

/// Header of the optional explicit column for the lowest growth tier.
const OPEN_LOWER: &str = "-inf";

/// Read a labelled grid table:
///
/// ```text
/// volume,      0.08, 0.15, 0.2
/// 0-9000,      1%,   2%,   3%
/// 9000-15000,  2,    3,    4
/// 15000+,      0.03, 0.04, 0.05
/// ```
///
/// The first column holds volume tier labels. Every other header is the lower
/// bound of a growth tier. The tier below the first bound is implied and pays
/// 0 unless the table starts with a `-inf` column, which then carries its
/// rates. A rate is a fraction (`0.03`), a percent (`3%`), or a whole number
/// of 1 or more read as a percent (`3`). A decimal above 1 is rejected as
/// ambiguous. Blank cells read as 0.
pub fn read_grid_table<R: Read>(reader: R) -> Result<RebateGrid, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err(LoadError::Table("need a volume column and at least one growth column".into()));
    }
    let explicit_lowest = headers[1].eq_ignore_ascii_case(OPEN_LOWER);
    let growth_edges = headers
        .iter()
        .skip(if explicit_lowest { 2 } else { 1 })
        .map(|h| parse_number(h).ok_or_else(|| LoadError::Table(format!("growth header {h:?} is not a number"))))
        .collect::<Result<Vec<f64>, _>>()?;

    let mut volume_edges = Vec::new();
    let mut previous_upper: Option<f64> = None;
    let mut rows = Vec::new();
    let mut last_open = false;

    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let line = i + 2;
        if last_open {
            return Err(LoadError::Table(format!("line {line}: rows follow an open-ended \"+\" tier")));
        }

        let label = record.get(0).unwrap_or_default();
        let (lower, upper) = parse_volume_label(label)
            .ok_or_else(|| LoadError::Table(format!("line {line}: bad volume label {label:?}")))?;
        if let Some(prev) = previous_upper
            && lower != prev
        {
            return Err(LoadError::Table(format!(
                "line {line}: tier {label:?} does not start where the previous one ended ({prev})"
            )));
        }
        match upper {
            Some(u) => {
                volume_edges.push(u);
                previous_upper = Some(u);
            }
            None => last_open = true,
        }

        let mut row = Vec::with_capacity(growth_edges.len() + 1);
        if !explicit_lowest {
            row.push(0.0);
        }
        for (col, cell) in record.iter().enumerate().skip(1) {
            let rate = parse_rate(cell).map_err(|reason| {
                LoadError::Table(format!("line {line}, column {}: bad rate {cell:?} ({reason})", col + 1))
            })?;
            row.push(rate);
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(LoadError::Table("no volume rows".into()));
    }
    // The last row's upper bound is implied by the open-ended final tier.
    if !last_open {
        volume_edges.pop();
    }
    if volume_edges.is_empty() {
        return Err(LoadError::Table("need at least two volume tiers".into()));
    }

    let bins = BinConfig::new(volume_edges, growth_edges)?;
    Ok(RebateGrid::from_rows(bins, rows)?)
}

pub fn read_grid_table_file(path: &Path) -> Result<RebateGrid, LoadError> {
    let file = std::fs::File::open(path)
        .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
    read_grid_table(file)
}

/// Write `grid` in the layout `read_grid_table` accepts, with the `-inf`
/// column so the lowest growth tier survives a round trip. Rates are written
/// as fractions that always carry a decimal point.
pub fn write_grid_table<W: Write>(writer: W, grid: &RebateGrid) -> Result<(), LoadError> {
    let mut w = csv::Writer::from_writer(writer);
    let bins = grid.bins();

    let mut header = vec!["volume".to_string(), OPEN_LOWER.to_string()];
    header.extend(bins.growth.edges().iter().map(|e| e.to_string()));
    w.write_record(&header)?;

    for (v, rates) in grid.rows().iter().enumerate() {
        let mut record = vec![bins.volume.label(v)];
        // Debug keeps "1.0" distinct from the whole-number percent "1".
        record.extend(rates.iter().map(|r| format!("{r:?}")));
        w.write_record(&record)?;
    }
    w.flush().map_err(|source| LoadError::Io { path: "<grid table>".into(), source })?;
    Ok(())
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let v = match s.strip_suffix('%') {
        Some(p) => p.trim().parse::<f64>().ok()? / 100.0,
        None => s.parse::<f64>().ok()?,
    };
    v.is_finite().then_some(v)
}

fn parse_rate(s: &str) -> Result<f64, &'static str> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0.0);
    }
    let v = parse_number(s).ok_or("not a number")?;
    let percent = s.ends_with('%');
    let whole = !percent && !s.contains(['.', 'e', 'E']);
    if percent || (whole && v >= 1.0) {
        let fraction = if percent { v } else { v / 100.0 };
        if fraction > 1.0 {
            return Err("percent above 100");
        }
        return Ok(fraction);
    }
    if v > 1.0 {
        return Err("decimal above 1; write a fraction or a percent");
    }
    Ok(v)
}

/// `"9000-15000"` to `(9000, Some(15000))`, `"45000+"` to `(45000, None)`.
fn parse_volume_label(s: &str) -> Option<(f64, Option<f64>)> {
    let s: String = s.chars().filter(|c| !matches!(c, ',' | ' ' | '$')).collect();
    if let Some(lo) = s.strip_suffix('+') {
        return Some((lo.parse().ok()?, None));
    }
    let (lo, hi) = s.split_once('-')?;
    Some((lo.parse().ok()?, Some(hi.parse().ok()?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Constraints;
    use crate::types::TierPair;

    const SAMPLE_TABLE: &str = "\
volume,0.08,0.15,0.2
0-9000,1%,2%,3%
9000-15000,2,3,4
15000-45000,0.03,0.04,0.05
45000+,0.04,0.05,0.07
";

    #[test]
    fn load_sample_table() {
        let grid = read_grid_table(SAMPLE_TABLE.as_bytes()).unwrap();
        assert_eq!(grid.bins().volume.edges(), &[9_000.0, 15_000.0, 45_000.0]);
        assert_eq!(grid.bins().growth.edges(), &[0.08, 0.15, 0.2]);
        assert_eq!(grid.shape(), (4, 4));
        assert_eq!(grid.rate(TierPair::new(0, 0)), 0.0);
        assert!((grid.rate(TierPair::new(0, 1)) - 0.01).abs() < 1e-12);
        assert!((grid.rate(TierPair::new(1, 3)) - 0.04).abs() < 1e-12);
        assert_eq!(grid.rate(TierPair::new(3, 3)), 0.07);
        grid.validate(&Constraints::default()).unwrap();
    }

    #[test]
    fn closed_last_row_drops_its_upper_bound() {
        let table = "volume,0.08\n0-5000,0.02\n5000-20000,0.03\n";
        let grid = read_grid_table(table.as_bytes()).unwrap();
        assert_eq!(grid.bins().volume.edges(), &[5_000.0]);
        assert_eq!(grid.rows(), vec![vec![0.0, 0.02], vec![0.0, 0.03]]);
    }

    #[test]
    fn gap_between_volume_rows_is_rejected() {
        let table = "volume,0.08\n0-5000,0.02\n6000+,0.03\n";
        assert!(matches!(read_grid_table(table.as_bytes()), Err(LoadError::Table(_))));
    }

    #[test]
    fn bad_rate_names_its_cell() {
        let table = "volume,0.08,0.15\n0-5000,0.02,abc\n5000+,0.03,0.04\n";
        let err = read_grid_table(table.as_bytes()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 2") && msg.contains("column 3"), "{msg}");
    }

    #[test]
    fn written_table_reads_back() {
        let grid = read_grid_table(SAMPLE_TABLE.as_bytes()).unwrap();
        let mut out = Vec::new();
        write_grid_table(&mut out, &grid).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("volume,-inf,0.08,0.15,0.2\n0-9000,0.0,0.01,"), "{text}");
        assert_eq!(read_grid_table(text.as_bytes()).unwrap(), grid);
    }

    #[test]
    fn whole_numbers_are_percents_and_decimals_are_fractions() {
        assert_eq!(parse_rate("1"), Ok(0.01));
        assert_eq!(parse_rate("12"), Ok(0.12));
        assert_eq!(parse_rate("0"), Ok(0.0));
        assert_eq!(parse_rate("1.0"), Ok(1.0));
        assert_eq!(parse_rate("0.5"), Ok(0.5));
        assert_eq!(parse_rate("7.5%"), Ok(0.075));
        assert_eq!(parse_rate(""), Ok(0.0));
        assert!(parse_rate("1.5").is_err());
        assert!(parse_rate("250").is_err());
        assert!(parse_rate("150%").is_err());
    }

    #[test]
    fn whole_number_row_matches_percent_row() {
        let table = "volume,0.08,0.15,0.2\n0-5000,1,2,3\n5000+,1%,2%,3%\n";
        let grid = read_grid_table(table.as_bytes()).unwrap();
        let rows = grid.rows();
        assert_eq!(rows[0], rows[1]);
        assert_eq!(rows[0], vec![0.0, 0.01, 0.02, 0.03]);
    }

    #[test]
    fn paying_lowest_growth_tier_survives_round_trip() {
        let bins = BinConfig::new(vec![10_000.0], vec![0.05, 0.10]).unwrap();
        let rows = vec![vec![0.0224, 0.0354, 0.0564], vec![0.041, 0.0695, 0.087]];
        let grid = RebateGrid::from_rows(bins, rows).unwrap();
        let low_floor = Constraints { growth_floor: 0.0, ..Constraints::default() };
        grid.validate(&low_floor).unwrap();

        let mut out = Vec::new();
        write_grid_table(&mut out, &grid).unwrap();
        let loaded = read_grid_table(out.as_slice()).unwrap();
        assert_eq!(loaded, grid);
        assert_eq!(loaded.rate(TierPair::new(1, 0)), 0.041);
    }

    #[test]
    fn explicit_lowest_column_is_read() {
        let table = "volume,-INF,0.05\n0-5000,2%,3%\n5000+,3%,4%\n";
        let grid = read_grid_table(table.as_bytes()).unwrap();
        assert_eq!(grid.bins().growth.edges(), &[0.05]);
        assert_eq!(grid.rows(), vec![vec![0.02, 0.03], vec![0.03, 0.04]]);
    }

    #[test]
    fn floor_column_with_rate_fails_validation_not_loading() {
        let bins = BinConfig::new(vec![5_000.0], vec![0.05, 0.08, 0.15]).unwrap();
        let grid = RebateGrid::from_rows(bins, vec![vec![0.0, 0.02, 0.03, 0.04]; 2]).unwrap();
        let mut out = Vec::new();
        write_grid_table(&mut out, &grid).unwrap();
        let loaded = read_grid_table(out.as_slice()).unwrap();
        assert!(loaded.validate(&Constraints::default()).is_err());
    }
}
