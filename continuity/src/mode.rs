//! The portable file mode carried by manifests.
//!
//! Manifests never store the host's raw `st_mode`: the type and permission
//! bits use a platform-independent layout so that manifests built on
//! different operating systems stay byte-comparable. Conversion to and from
//! host modes happens in the platform drivers.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// A file mode in the portable bit layout.
///
/// The lower 9 bits are the usual POSIX permission bits. File type and the
/// setuid/setgid/sticky modifiers live in the upper bits, independent of any
/// host encoding.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    pub const DIR: FileMode = FileMode(1 << 31);
    pub const SYMLINK: FileMode = FileMode(1 << 27);
    pub const DEVICE: FileMode = FileMode(1 << 26);
    pub const NAMED_PIPE: FileMode = FileMode(1 << 25);
    pub const SOCKET: FileMode = FileMode(1 << 24);
    pub const SETUID: FileMode = FileMode(1 << 23);
    pub const SETGID: FileMode = FileMode(1 << 22);
    pub const CHAR_DEVICE: FileMode = FileMode(1 << 20);
    pub const STICKY: FileMode = FileMode(1 << 19);
    /// Anything the portable layout cannot express.
    pub const IRREGULAR: FileMode = FileMode(1 << 18);

    /// Mask selecting the file type bits.
    pub const TYPE_MASK: FileMode = FileMode(
        Self::DIR.0
            | Self::SYMLINK.0
            | Self::DEVICE.0
            | Self::NAMED_PIPE.0
            | Self::SOCKET.0
            | Self::CHAR_DEVICE.0
            | Self::IRREGULAR.0,
    );

    /// Mask selecting the permission bits.
    pub const PERM_MASK: FileMode = FileMode(0o777);

    pub const fn new(bits: u32) -> FileMode {
        FileMode(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The permission bits only, without type or modifier bits.
    pub const fn perm(self) -> FileMode {
        FileMode(self.0 & Self::PERM_MASK.0)
    }

    pub const fn contains(self, other: FileMode) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_regular(self) -> bool {
        self.0 & Self::TYPE_MASK.0 == 0
    }

    pub const fn is_dir(self) -> bool {
        self.contains(Self::DIR)
    }

    pub const fn is_symlink(self) -> bool {
        self.contains(Self::SYMLINK)
    }

    pub const fn is_named_pipe(self) -> bool {
        self.contains(Self::NAMED_PIPE)
    }

    pub const fn is_device(self) -> bool {
        self.contains(Self::DEVICE)
    }

    pub const fn is_char_device(self) -> bool {
        self.contains(Self::CHAR_DEVICE)
    }

    pub const fn is_socket(self) -> bool {
        self.contains(Self::SOCKET)
    }
}

impl BitOr for FileMode {
    type Output = FileMode;

    fn bitor(self, rhs: FileMode) -> FileMode {
        FileMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileMode {
    fn bitor_assign(&mut self, rhs: FileMode) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FileMode {
    type Output = FileMode;

    fn bitand(self, rhs: FileMode) -> FileMode {
        FileMode(self.0 & rhs.0)
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:#o})", self.0)
    }
}

/// Renders the mode in `ls -l` notation, e.g. `drwxr-sr-x`.
impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_dir() {
            'd'
        } else if self.is_symlink() {
            'l'
        } else if self.is_named_pipe() {
            'p'
        } else if self.is_char_device() {
            'c'
        } else if self.is_device() {
            'b'
        } else if self.is_socket() {
            's'
        } else {
            '-'
        };

        let mut out = [kind as u8, b'-', b'-', b'-', b'-', b'-', b'-', b'-', b'-', b'-'];
        const RWX: [u8; 3] = [b'r', b'w', b'x'];
        for i in 0..9 {
            if self.0 & (0o400 >> i) != 0 {
                out[i + 1] = RWX[i % 3];
            }
        }

        // setuid/setgid/sticky replace the corresponding execute slot.
        if self.contains(Self::SETUID) {
            out[3] = if self.0 & 0o100 != 0 { b's' } else { b'S' };
        }
        if self.contains(Self::SETGID) {
            out[6] = if self.0 & 0o010 != 0 { b's' } else { b'S' };
        }
        if self.contains(Self::STICKY) {
            out[9] = if self.0 & 0o001 != 0 { b't' } else { b'T' };
        }

        f.write_str(std::str::from_utf8(&out).expect("mode rendering is ascii"))
    }
}
