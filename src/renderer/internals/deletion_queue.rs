/// Deferred teardown of GPU objects whose lifetime is tied to a scope (a frame, an asset group,
/// or the whole renderer).
///
/// Closures run last-in first-out on [`DeletionQueue::flush`], which mirrors the reverse order
/// in which dependent objects must be destroyed. The queue never checks whether the GPU is done
/// with the captured handles; callers flush only after the relevant fence has been waited on.
#[derive(Default)]
pub struct DeletionQueue {
    deletors: Vec<Box<dyn FnOnce()>>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, deletor: F)
    where
        F: FnOnce() + 'static,
    {
        self.deletors.push(Box::new(deletor));
    }

    pub fn flush(&mut self) {
        while let Some(deletor) = self.deletors.pop() {
            deletor();
        }
    }

    pub fn len(&self) -> usize {
        self.deletors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletors.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.deletors.is_empty() {
            log::warn!(
                "Deletion queue dropped with {} pending deletors; their resources leak",
                self.deletors.len(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn flush_runs_in_reverse_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeletionQueue::new();

        for id in 1..=5 {
            let log = log.clone();
            queue.push(move || log.borrow_mut().push(id));
        }
        assert_eq!(queue.len(), 5);

        queue.flush();

        assert_eq!(*log.borrow(), vec![5, 4, 3, 2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn flush_on_empty_queue_is_a_no_op() {
        let mut queue = DeletionQueue::new();
        queue.flush();
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_is_reusable_after_flush() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeletionQueue::new();

        let first = log.clone();
        queue.push(move || first.borrow_mut().push("frame 0"));
        queue.flush();

        let second = log.clone();
        queue.push(move || second.borrow_mut().push("frame 1a"));
        let third = log.clone();
        queue.push(move || third.borrow_mut().push("frame 1b"));
        queue.flush();

        assert_eq!(*log.borrow(), vec!["frame 0", "frame 1b", "frame 1a"]);
    }

    #[test]
    fn dropping_does_not_run_pending_deletors() {
        let ran = Rc::new(RefCell::new(false));
        {
            let mut queue = DeletionQueue::new();
            let ran = ran.clone();
            queue.push(move || *ran.borrow_mut() = true);
        }
        assert!(!*ran.borrow());
    }
}
