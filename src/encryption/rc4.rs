/// The RC4 stream cipher with a precomputed key schedule.
pub struct Rc4 {
    initial_state: [u8; 256],
}

impl Rc4 {
    /// Schedules `key`. Keys longer than 256 bytes are truncated; an empty key acts as a single zero byte.
    pub fn new<Key: AsRef<[u8]>>(key: Key) -> Self {
        let key = key.as_ref();
        let key = if key.is_empty() { &[0u8][..] } else { &key[..key.len().min(256)] };

        let mut initial_state = [0_u8; 256];
        for (i, v) in initial_state.iter_mut().enumerate() {
            *v = i as u8;
        }

        let mut j = 0_u8;
        for i in 0..256 {
            j = j.wrapping_add(initial_state[i]).wrapping_add(key[i % key.len()]);
            initial_state.swap(i, j as usize);
        }

        Self { initial_state }
    }

    /// XORs the keystream over `input` into a new buffer. RC4 is symmetric, so this both
    /// encrypts and decrypts.
    pub fn apply<Input>(&self, input: Input) -> Vec<u8>
    where
        Input: AsRef<[u8]>,
    {
        let mut state = self.initial_state;
        let mut i = 0_u8;
        let mut j = 0_u8;
        input
            .as_ref()
            .iter()
            .map(|byte| {
                i = i.wrapping_add(1);
                j = j.wrapping_add(state[i as usize]);
                state.swap(i as usize, j as usize);
                byte ^ state[(state[i as usize].wrapping_add(state[j as usize])) as usize]
            })
            .collect()
    }
}
