//! `.idx` inventories published next to each GRIB2 file.
//!
//! Each line reads `n:offset:d=YYYYMMDDHH:NAME:LEVEL:FORECAST:`. A message
//! runs from its offset to the next larger offset, the last one to the end
//! of the object. Sub-messages (`71.1`, `71.2`) share their parent's offset.

use std::ops::Range;

/// One inventory line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxEntry {
    /// Message number as written, e.g. "12" or "71.2"
    pub number: String,
    pub offset: u64,
    /// `d=YYYYMMDDHH`
    pub reference: String,
    pub name: String,
    pub level: String,
    pub forecast: String,
}

impl IdxEntry {
    /// `NAME:LEVEL`, the form used to match catalog entries.
    pub fn name_level(&self) -> String {
        format!("{}:{}", self.name, self.level)
    }
}

/// Parse an inventory. Blank lines are ignored; any malformed line or a
/// decreasing offset rejects the whole inventory.
pub fn parse_idx(text: &str) -> Result<Vec<IdxEntry>, String> {
    let mut entries: Vec<IdxEntry> = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 6 {
            return Err(format!("line {}: expected at least 6 fields in {:?}", i + 1, line));
        }
        let offset: u64 = fields[1]
            .parse()
            .map_err(|_| format!("line {}: invalid offset {:?}", i + 1, fields[1]))?;

        if let Some(prev) = entries.last() {
            if offset < prev.offset {
                return Err(format!(
                    "line {}: offset {} precedes previous offset {}",
                    i + 1,
                    offset,
                    prev.offset
                ));
            }
        }

        entries.push(IdxEntry {
            number: fields[0].to_string(),
            offset,
            reference: fields[2].to_string(),
            name: fields[3].to_string(),
            level: fields[4].to_string(),
            forecast: fields[5].to_string(),
        });
    }

    if entries.is_empty() {
        return Err("inventory is empty".to_string());
    }
    Ok(entries)
}

/// Offset of the first entry that starts at or past the end of an object
/// of `total_len` bytes. Such an inventory belongs to a different object.
pub fn offset_beyond(entries: &[IdxEntry], total_len: u64) -> Option<u64> {
    entries
        .iter()
        .map(|e| e.offset)
        .find(|&offset| offset >= total_len)
}

/// Byte ranges covering every wanted message of an object of `total_len`
/// bytes. Adjacent ranges are merged and shared sub-message ranges are
/// fetched once. Ranges never extend past `total_len`.
pub fn select_ranges<F>(entries: &[IdxEntry], total_len: u64, wanted: F) -> Vec<Range<u64>>
where
    F: Fn(&str) -> bool,
{
    let mut ranges: Vec<Range<u64>> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if !wanted(&entry.name_level()) {
            continue;
        }
        let end = entries[i + 1..]
            .iter()
            .map(|e| e.offset)
            .find(|&o| o > entry.offset)
            .unwrap_or(total_len)
            .min(total_len);
        if end <= entry.offset {
            continue;
        }

        match ranges.last_mut() {
            Some(last) if entry.offset <= last.end => last.end = last.end.max(end),
            _ => ranges.push(entry.offset..end),
        }
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = "\
1:0:d=2024010106:REFC:entire atmosphere:5 hour fcst:
2:100:d=2024010106:TMP:2 m above ground:5 hour fcst:
3:250:d=2024010106:DPT:2 m above ground:5 hour fcst:
4:400:d=2024010106:UGRD:10 m above ground:5 hour fcst:
4.1:400:d=2024010106:VGRD:10 m above ground:5 hour fcst:
5:600:d=2024010106:PRES:surface:5 hour fcst:
";

    #[test]
    fn test_parse_inventory() {
        let entries = parse_idx(INVENTORY).unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[1].name_level(), "TMP:2 m above ground");
        assert_eq!(entries[1].offset, 100);
        assert_eq!(entries[4].number, "4.1");
        assert_eq!(entries[0].reference, "d=2024010106");
    }

    #[test]
    fn test_select_single_message() {
        let entries = parse_idx(INVENTORY).unwrap();
        let ranges = select_ranges(&entries, 800, |n| n == "TMP:2 m above ground");
        assert_eq!(ranges, vec![100..250]);
    }

    #[test]
    fn test_adjacent_messages_merge() {
        let entries = parse_idx(INVENTORY).unwrap();
        let ranges = select_ranges(&entries, 800, |n| n.ends_with("2 m above ground"));
        assert_eq!(ranges, vec![100..400]);
    }

    #[test]
    fn test_submessages_share_one_range_and_last_runs_to_end() {
        let entries = parse_idx(INVENTORY).unwrap();
        let ranges = select_ranges(&entries, 800, |n| {
            n.starts_with("VGRD") || n.starts_with("UGRD") || n == "PRES:surface"
        });
        assert_eq!(ranges, vec![400..800]);

        let ranges = select_ranges(&entries, 800, |n| n == "VGRD:10 m above ground");
        assert_eq!(ranges, vec![400..600]);
    }

    #[test]
    fn test_ranges_stop_at_object_end() {
        let entries = parse_idx(INVENTORY).unwrap();
        let ranges = select_ranges(&entries, 300, |n| {
            n == "TMP:2 m above ground" || n == "DPT:2 m above ground" || n == "PRES:surface"
        });
        assert_eq!(ranges, vec![100..300]);

        assert_eq!(offset_beyond(&entries, 800), None);
        assert_eq!(offset_beyond(&entries, 300), Some(400));
    }

    #[test]
    fn test_no_match_is_empty() {
        let entries = parse_idx(INVENTORY).unwrap();
        assert!(select_ranges(&entries, 800, |_| false).is_empty());
    }

    #[test]
    fn test_malformed_inventory() {
        assert!(parse_idx("").is_err());
        assert!(parse_idx("1:abc:d=1:TMP:2 m:anl:").is_err());
        assert!(parse_idx("1:0:d=1\n").is_err());
        assert!(parse_idx("1:100:d=1:A:b:anl:\n2:50:d=1:B:b:anl:\n").is_err());
    }
}
