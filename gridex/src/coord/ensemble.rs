/// One ensemble member
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Member {
    /// Type of ensemble forecast (WMO code table 4.6)
    pub ens_type: u8,

    /// Perturbation number
    pub number: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnsembleCoord {
    pub members: Vec<Member>,
}

impl EnsembleCoord {
    pub fn new(members: impl IntoIterator<Item = Member>) -> Self {
        let mut members: Vec<Member> = members.into_iter().collect();
        members.sort();
        members.dedup();

        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn index_of(&self, member: &Member) -> Option<usize> {
        self.members.binary_search(member).ok()
    }
}
