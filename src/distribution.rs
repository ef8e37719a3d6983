//! Power distribution: maps one group power value onto per-member commands.
//!
//! Two policies are supported:
//!
//! - **Uniform**: every member receives the group power (`Off` at 0%).
//! - **Sequential fill**: members are filled in configured order, one share
//!   of `100 / N` at a time. The first member whose share is not fully
//!   covered receives `round(remaining / power * 100)`, the rest are off.
//!
//! The output vector is index-aligned with the member list.

use crate::types::{DistributionPolicy, MemberCommand, FULL_POWER};

/// Compute the command for each of `members` members at group `power`.
///
/// `power` must already be clamped to [0, 100].
pub fn distribute(policy: DistributionPolicy, power: u8, members: usize) -> Vec<MemberCommand> {
    match policy {
        DistributionPolicy::Uniform => uniform(power, members),
        DistributionPolicy::SequentialFill => sequential_fill(power, members),
    }
}

fn uniform(power: u8, members: usize) -> Vec<MemberCommand> {
    let command = if power == 0 {
        MemberCommand::Off
    } else {
        MemberCommand::On { power }
    };
    vec![command; members]
}

fn sequential_fill(power: u8, members: usize) -> Vec<MemberCommand> {
    if members == 0 {
        return Vec::new();
    }
    if power == 0 {
        return vec![MemberCommand::Off; members];
    }

    // Everything is scaled by N so each share is exactly FULL_POWER.
    let full = u64::from(FULL_POWER);
    let requested = u64::from(power) * members as u64;
    let mut remaining = requested;
    let mut commands = Vec::with_capacity(members);

    for _ in 0..members {
        let command = if remaining >= full {
            remaining -= full;
            MemberCommand::On { power: FULL_POWER }
        } else if remaining > 0 {
            let sub = round_ratio(remaining * full, requested);
            remaining = 0;
            if sub > 0 {
                MemberCommand::On {
                    power: u8::try_from(sub.min(full)).unwrap_or(FULL_POWER),
                }
            } else {
                MemberCommand::Off
            }
        } else {
            MemberCommand::Off
        };
        commands.push(command);
    }

    commands
}

/// `num / den` rounded half away from zero.
const fn round_ratio(num: u64, den: u64) -> u64 {
    (2 * num + den) / (2 * den)
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn on(power: u8) -> MemberCommand {
        MemberCommand::On { power }
    }

    #[test]
    fn test_uniform_three_members_at_fifty() {
        let commands = distribute(DistributionPolicy::Uniform, 50, 3);
        assert_eq!(commands, vec![on(50), on(50), on(50)]);
    }

    #[test]
    fn test_uniform_zero_power_turns_members_off() {
        let commands = distribute(DistributionPolicy::Uniform, 0, 2);
        assert_eq!(commands, vec![MemberCommand::Off, MemberCommand::Off]);
    }

    #[test]
    fn test_sequential_fill_four_members_at_thirty() {
        // share = 25: first member full, second gets round(5/30*100) = 17
        let commands = distribute(DistributionPolicy::SequentialFill, 30, 4);
        assert_eq!(
            commands,
            vec![on(100), on(17), MemberCommand::Off, MemberCommand::Off]
        );
    }

    #[test]
    fn test_sequential_fill_full_power_turns_everything_on() {
        let commands = distribute(DistributionPolicy::SequentialFill, 100, 4);
        assert!(commands.iter().all(|c| *c == on(100)));
    }

    #[test]
    fn test_sequential_fill_full_power_for_every_group_size() {
        // 100 / N is inexact for N = 3, 6, 7; the last member must still be full
        for n in 1..=8 {
            let commands = distribute(DistributionPolicy::SequentialFill, 100, n);
            assert_eq!(commands, vec![on(100); n], "group of {n}");
        }
    }

    #[test]
    fn test_sequential_fill_thirds() {
        // 50% over three members: one full share, remainder 50/3 -> round(33.3) = 33
        let commands = distribute(DistributionPolicy::SequentialFill, 50, 3);
        assert_eq!(commands, vec![on(100), on(33), MemberCommand::Off]);
    }

    #[test]
    fn test_round_ratio_ties_away_from_zero() {
        assert_eq!(round_ratio(1, 2), 1);
        assert_eq!(round_ratio(1, 3), 0);
        assert_eq!(round_ratio(2, 3), 1);
    }

    #[test]
    fn test_sequential_fill_exact_share_boundary() {
        // 50% over two members: first gets its full share, nothing left for the second
        let commands = distribute(DistributionPolicy::SequentialFill, 50, 2);
        assert_eq!(commands, vec![on(100), MemberCommand::Off]);
    }

    #[test]
    fn test_sequential_fill_below_first_share() {
        // 10% over two members: remaining never reaches a share, so the first
        // member gets round(10/10*100) = 100 and the second is off
        let commands = distribute(DistributionPolicy::SequentialFill, 10, 2);
        assert_eq!(commands, vec![on(100), MemberCommand::Off]);
    }

    #[test]
    fn test_sequential_fill_zero_power_all_off() {
        let commands = distribute(DistributionPolicy::SequentialFill, 0, 3);
        assert_eq!(commands, vec![MemberCommand::Off; 3]);
    }

    #[test]
    fn test_no_members_is_a_noop() {
        assert!(distribute(DistributionPolicy::Uniform, 80, 0).is_empty());
        assert!(distribute(DistributionPolicy::SequentialFill, 80, 0).is_empty());
    }
}
