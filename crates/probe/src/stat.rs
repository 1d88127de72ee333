use crate::Error;
use std::str::FromStr;

/// Fields of a `/proc/<pid>/stat` record that the probe cares about.
///
/// Times are in scheduler ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatLine {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub starttime: u64,
}

// Offsets into the fields following the command name: state is field 3 of
// the record, so index 0 here.
const STATE: usize = 0;
const PPID: usize = 1;
const UTIME: usize = 11;
const STIME: usize = 12;
const STARTTIME: usize = 19;

impl StatLine {
    /// Zombies keep their record until reaped but are not running anymore.
    pub fn is_running(&self) -> bool {
        !matches!(self.state, 'Z' | 'X' | 'x')
    }
}

impl FromStr for StatLine {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        // The command name may itself contain spaces and parentheses, so it
        // ends at the *last* ')' of the record.
        let rparen = line
            .rfind(')')
            .ok_or_else(|| invalid(line, "missing ')'"))?;
        let lparen = line
            .find('(')
            .filter(|&l| l < rparen)
            .ok_or_else(|| invalid(line, "missing '('"))?;

        let pid = line[..lparen]
            .trim()
            .parse()
            .map_err(|_| invalid(line, "bad pid"))?;
        let comm = line[lparen + 1..rparen].to_string();

        let fields: Vec<&str> = line[rparen + 1..].split_whitespace().collect();
        if fields.len() <= STARTTIME {
            return Err(invalid(line, "truncated record"));
        }

        let state = fields[STATE]
            .chars()
            .next()
            .ok_or_else(|| invalid(line, "empty state"))?;
        let number = |ix: usize, what: &str| -> Result<u64, Error> {
            fields[ix]
                .parse()
                .map_err(|_| invalid(line, &format!("bad {what}")))
        };

        Ok(Self {
            pid,
            comm,
            state,
            ppid: u32::try_from(number(PPID, "ppid")?).map_err(|_| invalid(line, "bad ppid"))?,
            utime: number(UTIME, "utime")?,
            stime: number(STIME, "stime")?,
            starttime: number(STARTTIME, "starttime")?,
        })
    }
}

fn invalid(line: &str, reason: &str) -> Error {
    Error::InvalidProcessRecord(format!("{reason} in stat line {:?}", line.trim_end()))
}

#[cfg(test)]
pub(crate) fn build_stat_line(
    pid: u32,
    comm: &str,
    ppid: u32,
    utime: u64,
    stime: u64,
    starttime: u64,
) -> String {
    format!(
        "{pid} ({comm}) S {ppid} {pid} {pid} 0 -1 0 0 0 0 0 {utime} {stime} 0 0 20 0 1 0 {starttime} \
         0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0"
    )
}
