//! Site code parsing from group display names.

/// Parse the numeric site code from a group name of the form `<digits>_<label>`.
///
/// `"05_duke"` yields `Some(5)`. Names without an underscore, with a
/// non-numeric leading token, or whose code is `0` yield `None`.
pub fn parse_site_code(group_name: &str) -> Option<u32> {
    let (number, _label) = group_name.split_once('_')?;
    let number = number.trim();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse::<u32>().ok().filter(|code| *code > 0)
}
