/// A table of values indexed by the lowest free slot, an index being reused only once released.
#[derive(Debug)]
pub struct Slots<T> {
    inner: Vec<Option<T>>,
    limit: usize,
}

impl<T> Slots<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Vec::new(),
            limit,
        }
    }

    /// Insert the value built from its index in the first free slot.
    pub fn insert_with(&mut self, f: impl FnOnce(u32) -> T) -> Option<u32> {
        let index = match self.inner.iter().position(Option::is_none) {
            Some(index) => index,
            None if self.inner.len() < self.limit => {
                self.inner.push(None);

                self.inner.len() - 1
            }
            None => return None,
        };

        let id = u32::try_from(index).ok()?;
        self.inner[index] = Some(f(id));

        Some(id)
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.inner.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.inner.get_mut(id as usize).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        let value = self.inner.get_mut(id as usize).and_then(Option::take);

        while matches!(self.inner.last(), Some(None)) {
            self.inner.pop();
        }

        value
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.inner.drain(..).flatten()
    }

    pub fn len(&self) -> usize {
        self.inner.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_reserves_and_releases() {
        let mut slots = Slots::new(4);

        let one = slots.insert_with(|_| ());
        let two = slots.insert_with(|_| ());
        let three = slots.insert_with(|_| ());
        let four = slots.insert_with(|_| ());
        let five = slots.insert_with(|_| ());

        assert_eq!(one, Some(0));
        assert!(two.is_some());
        assert!(three.is_some());
        assert!(four.is_some());
        assert!(five.is_none());

        slots.remove(2);

        assert_eq!(slots.insert_with(|_| ()), Some(2));
    }

    #[test]
    fn value_knows_its_index() {
        let mut slots = Slots::new(8);

        slots.insert_with(|id| id * 10);
        let id = slots.insert_with(|id| id * 10).unwrap();

        assert_eq!(slots.get(id), Some(&10));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn out_of_bound_get() {
        let mut slots = Slots::new(4);

        slots.insert_with(|_| ());

        assert!(slots.get(u32::MAX).is_none());
        assert!(slots.remove(3).is_none());
    }
}
