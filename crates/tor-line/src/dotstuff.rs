/// Dot-unstuff a single data line received inside a `+`-prefixed reply: a
/// leading `.` is escaped by doubling it on the wire, so we remove at most
/// one leading `.` here. The line terminating the block (a bare `.`) must be
/// recognized by the caller before this is invoked.
pub fn unstuff_data_line(line: &[u8]) -> &[u8] {
    if line.first() == Some(&b'.') {
        &line[1..]
    } else {
        line
    }
}

/// Dot-stuff a single data line before writing it inside a `+`-prefixed
/// command: a leading `.` gets doubled so it can't be confused with the
/// block terminator.
pub fn stuff_data_line(line: &[u8]) -> Vec<u8> {
    if line.first() == Some(&b'.') {
        let mut out = Vec::with_capacity(line.len() + 1);
        out.push(b'.');
        out.extend_from_slice(line);
        out
    } else {
        line.to_vec()
    }
}
